// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire protocol between the node and the gateway.
//!
//! Every frame is a JSON text message tagged by `type`:
//!
//! ```text
//! {"type":"req",   "id", "method", "params"}
//! {"type":"res",   "id", "ok", "payload"?, "error"?}
//! {"type":"event", "event", "payload", "seq"?, "stateVersion"?}
//! ```
//!
//! # Typical session flow
//!
//! ```text
//! Node                                   Gateway
//!  │                                        │
//!  │◄── event connect.challenge {nonce} ────│
//!  │─── req connect {device{signature}} ───►│
//!  │◄── res ok hello-ok {policy, auth} ─────│
//!  │                                        │
//!  │◄── req node.invoke {command, params} ──│
//!  │─── res ok {payload} ──────────────────►│
//! ```

pub mod codec;
pub mod commands;
pub mod frames;
pub mod handshake;

pub use codec::{decode_frame, encode_frame, CodecError};
pub use frames::{ErrorShape, EventFrame, Frame, RequestFrame, ResponseFrame};
