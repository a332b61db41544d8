// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Connection lifecycle: state machine, request correlation, reconnect
//! backoff, keepalive, and the [`GatewayNode`] task tying them together.

pub mod backoff;
mod keepalive;
pub mod node;
pub mod pending;
pub mod state;

pub use backoff::{ReconnectPolicy, MAX_ATTEMPTS_REASON};
pub use node::{GatewayNode, NodeEvent, NodeHandle, NodeOptions, NodeSnapshot};
pub use pending::PendingRequests;
pub use state::{ConnectionState, InvalidTransition, StateMachine};
