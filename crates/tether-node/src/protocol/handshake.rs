// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Connect handshake payloads.
//!
//! The gateway opens with a `connect.challenge` event carrying a nonce. The
//! node answers with a single `connect` request whose `device` block holds an
//! Ed25519 signature over a pipe-joined string:
//!
//! ```text
//! v2|<deviceId>|<clientId>|<clientMode>|<role>|<scope,scope>|<signedAtMs>|<token>|<nonce>
//! ```
//!
//! An absent token is encoded as the empty string. A successful `connect`
//! response carries a `hello-ok` payload with the session policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::DeviceIdentity;

pub const PROTOCOL_VERSION: u32 = 3;
pub const CONNECT_METHOD: &str = "connect";
pub const CONNECT_CHALLENGE_EVENT: &str = "connect.challenge";
pub const HELLO_OK: &str = "hello-ok";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 30_000;

const AUTH_PAYLOAD_VERSION: &str = "v2";

/// Payload of the `connect.challenge` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectChallenge {
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

/// The string the device signs during the handshake.
#[derive(Debug, Clone)]
pub struct DeviceAuthPayload<'a> {
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: i64,
    pub token: Option<&'a str>,
    pub nonce: &'a str,
}

impl DeviceAuthPayload<'_> {
    pub fn encode(&self) -> String {
        let signed_at = self.signed_at_ms.to_string();
        let scopes = self.scopes.join(",");
        [
            AUTH_PAYLOAD_VERSION,
            self.device_id,
            self.client_id,
            self.client_mode,
            self.role,
            scopes.as_str(),
            signed_at.as_str(),
            self.token.unwrap_or(""),
            self.nonce,
        ]
        .join("|")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub version: String,
    pub platform: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBlock {
    pub id: String,
    pub public_key: String,
    pub signature: String,
    pub signed_at: i64,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Parameters of the `connect` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthParams>,
    pub locale: String,
    pub user_agent: String,
    pub device: DeviceBlock,
}

impl ConnectParams {
    /// Rebuild the signed string from the fields the gateway received.
    pub fn auth_payload(&self) -> String {
        DeviceAuthPayload {
            device_id: &self.device.id,
            client_id: &self.client.id,
            client_mode: &self.client.mode,
            role: &self.role,
            scopes: &self.scopes,
            signed_at_ms: self.device.signed_at,
            token: self.auth.as_ref().and_then(|a| a.token.as_deref()),
            nonce: &self.device.nonce,
        }
        .encode()
    }
}

/// The parts of a `connect` request that stay fixed across attempts.
#[derive(Debug, Clone)]
pub struct ConnectTemplate {
    pub client: ClientInfo,
    pub role: String,
    pub scopes: Vec<String>,
    pub caps: Vec<String>,
    pub commands: Vec<String>,
    pub locale: String,
    pub user_agent: String,
}

impl ConnectTemplate {
    /// Sign and assemble the `connect` parameters for one challenge.
    pub fn build(
        &self,
        identity: &DeviceIdentity,
        permissions: BTreeMap<String, bool>,
        token: Option<&str>,
        nonce: &str,
        signed_at_ms: i64,
    ) -> ConnectParams {
        let payload = DeviceAuthPayload {
            device_id: identity.device_id(),
            client_id: &self.client.id,
            client_mode: &self.client.mode,
            role: &self.role,
            scopes: &self.scopes,
            signed_at_ms,
            token,
            nonce,
        };
        let signature = identity.sign(&payload.encode());

        ConnectParams {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: self.client.clone(),
            role: self.role.clone(),
            scopes: self.scopes.clone(),
            caps: self.caps.clone(),
            commands: self.commands.clone(),
            permissions,
            auth: token.map(|t| AuthParams {
                token: Some(t.to_string()),
            }),
            locale: self.locale.clone(),
            user_agent: self.user_agent.clone(),
            device: DeviceBlock {
                id: identity.device_id().to_string(),
                public_key: identity.public_key().to_string(),
                signature,
                signed_at: signed_at_ms,
                nonce: nonce.to_string(),
            },
        }
    }
}

// ── hello-ok ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(rename = "type")]
    pub kind: String,
    pub protocol: u32,
    #[serde(default)]
    pub policy: SessionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HelloAuth>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPolicy {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            max_payload: None,
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

// ── Unit tests ────────────────────────────────────────────────────────────────
