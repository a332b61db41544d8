// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Gateway protocol engine for tether device nodes.
//!
//! A node keeps one authenticated WebSocket connection to a gateway and
//! serves capability commands (`camera.*`, `canvas.*`, `location.get`,
//! `screen.record`) over it.
//!
//! # Layers
//!
//! - [`identity`]: Ed25519 device keypair and persisted session tokens.
//! - [`protocol`]: JSON frames, handshake payloads, command parameters.
//! - [`transport`]: text-frame connections (WebSocket, in-memory).
//! - [`client`]: the [`GatewayNode`] task and its [`NodeHandle`].
//! - [`dispatch`]: routing of invocations to host capabilities.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod transport;

pub use client::{ConnectionState, GatewayNode, NodeEvent, NodeHandle, NodeOptions};
pub use dispatch::{Capabilities, CommandDispatcher, DispatchPolicy};
pub use error::{NodeError, RequestError};
pub use identity::{DeviceIdentity, IdentityStore};
