// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Node configuration loaded from YAML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! node that dials a loopback gateway with the standard reconnect policy.
//!
//! # Example full config
//! ```yaml
//! gateway:
//!   url: "wss://gateway.lan:18789"
//!   handshake_timeout_ms: 10000
//!   reconnect:
//!     initial_delay_ms: 1000
//!     max_delay_ms: 30000
//!     max_attempts: 10
//!
//! client:
//!   id: "tether-node"
//!   display_name: "Kitchen tablet"
//!   locale: "en-US"
//!
//! node:
//!   role: node
//!   camera_enabled: true
//!   location_mode: while_using
//!   static_location:
//!     lat: 59.33
//!     lon: 18.06
//!     accuracy_meters: 25.0
//!
//! identity:
//!   dir: "~/.config/tether/identity"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper returning `true`.
fn default_true() -> bool {
    true
}

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

// ── Gateway connection ───────────────────────────────────────────────────────

/// Where the node connects and how it recovers from connection loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway. Default: `ws://127.0.0.1:18789`.
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Milliseconds allowed between opening the socket and receiving
    /// `hello-ok`. The attempt fails like a transport error afterwards.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:18789".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Exponential backoff applied after an unexpected connection loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Retries allowed before the node gives up and waits for an explicit
    /// connect.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

// ── Client metadata ──────────────────────────────────────────────────────────

/// Metadata reported to the gateway in the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Stable client identifier. It is part of the signed handshake payload.
    #[serde(default = "default_client_id")]
    pub id: String,
    /// Human-readable name shown in the gateway's device list.
    pub display_name: Option<String>,
    /// Platform string, e.g. `"linux 6.8"`. Defaults to the build target OS.
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Client mode. Also part of the signed payload.
    #[serde(default = "default_client_mode")]
    pub mode: String,
    /// Version string reported to the gateway. Defaults to the crate version.
    pub version: Option<String>,
    pub device_family: Option<String>,
    pub model_identifier: Option<String>,
    pub instance_id: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_client_id() -> String {
    "tether-node".to_string()
}
fn default_platform() -> String {
    std::env::consts::OS.to_string()
}
fn default_client_mode() -> String {
    "node".to_string()
}
fn default_locale() -> String {
    "en-US".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            display_name: None,
            platform: default_platform(),
            mode: default_client_mode(),
            version: None,
            device_family: None,
            model_identifier: None,
            instance_id: None,
            locale: default_locale(),
        }
    }
}

// ── Node behaviour ───────────────────────────────────────────────────────────

/// How the node presents itself and which capabilities policy allows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Role requested during the handshake.
    #[serde(default = "default_role")]
    pub role: String,
    /// Scopes requested during the handshake. Nodes normally request none.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// When `false`, every `camera.*` command fails with `CAMERA_DISABLED`.
    #[serde(default = "default_true")]
    pub camera_enabled: bool,
    /// When `off`, `location.get` fails with `LOCATION_DISABLED`.
    #[serde(default)]
    pub location_mode: LocationMode,
    /// Fixed position served by the headless host's location capability.
    pub static_location: Option<StaticLocation>,
    /// Number of dispatch outcomes kept in the in-memory activity log.
    #[serde(default = "default_activity_capacity")]
    pub activity_capacity: usize,
}

fn default_role() -> String {
    "node".to_string()
}
fn default_activity_capacity() -> usize {
    100
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            scopes: Vec::new(),
            camera_enabled: true,
            location_mode: LocationMode::default(),
            static_location: None,
            activity_capacity: default_activity_capacity(),
        }
    }
}

/// Location sharing policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    Off,
    #[default]
    WhileUsing,
    Always,
}

/// A fixed coordinate used when the host has no location hardware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticLocation {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_static_accuracy")]
    pub accuracy_meters: f64,
    pub altitude_meters: Option<f64>,
}

fn default_static_accuracy() -> f64 {
    100.0
}

// ── Identity storage ─────────────────────────────────────────────────────────

/// Where the device keypair and session tokens live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Directory holding `device.yaml` and `device-auth.yaml`. Defaults to
    /// `~/.config/tether/identity`.
    pub dir: Option<PathBuf>,
}

impl IdentityConfig {
    /// Resolve the identity directory, falling back to the per-user default.
    pub fn resolved_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => crate::expand_path(dir),
            None => dirs::config_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tether/identity"),
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
