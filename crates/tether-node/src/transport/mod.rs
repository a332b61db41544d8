// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Bidirectional text-frame transport.
//!
//! The engine only ever sees the three traits below. [`ws::WsConnector`]
//! dials a real gateway; [`memory::memory_transport`] wires the engine to an
//! in-process peer for tests and local tooling.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{memory_transport, MemoryConnector, MemoryGateway, MemoryPeer, PeerMessage};
pub use ws::WsConnector;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed")]
    Closed,
}

/// An open connection split into its writing and reading halves.
pub type TransportPair = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens connections to a gateway URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<TransportPair, TransportError>;
}

/// Writing half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Transport-level liveness probe.
    async fn ping(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Reading half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// The next inbound text frame. `None` once the peer has closed.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}
