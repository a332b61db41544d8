// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! In-process transport.
//!
//! [`memory_transport`] returns a connector for the engine and a
//! [`MemoryGateway`] that receives one [`MemoryPeer`] per successful dial.
//! The peer plays the gateway: it pushes frames to the node and observes
//! everything the node writes, including pings and closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Connector, FrameSink, FrameSource, TransportError, TransportPair};
use crate::protocol::{decode_frame, encode_frame, EventFrame, Frame};

/// What the node wrote to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Text(String),
    Ping,
    Close,
}

#[derive(Default)]
struct Shared {
    refuse: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

/// Create a connected connector/gateway pair.
pub fn memory_transport() -> (MemoryConnector, MemoryGateway) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    (
        MemoryConnector {
            accept_tx,
            shared: shared.clone(),
        },
        MemoryGateway { accept_rx, shared },
    )
}

#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<TransportPair, TransportError> {
        if let Ok(mut attempts) = self.shared.attempts.lock() {
            attempts.push(Instant::now());
        }
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (to_node_tx, to_node_rx) = mpsc::unbounded_channel();
        let (from_node_tx, from_node_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            to_node: Some(to_node_tx),
            from_node: from_node_rx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect("gateway is gone".into()))?;

        Ok((
            Box::new(MemorySink { tx: from_node_tx }),
            Box::new(MemorySource { rx: to_node_rx }),
        ))
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<PeerMessage>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(PeerMessage::Text(text))
            .map_err(|_| TransportError::Send("peer is gone".into()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.tx
            .send(PeerMessage::Ping)
            .map_err(|_| TransportError::Send("peer is gone".into()))
    }

    async fn close(&mut self) {
        let _ = self.tx.send(PeerMessage::Close);
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Listening side of the in-memory transport.
pub struct MemoryGateway {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

impl MemoryGateway {
    /// Wait for the next successful dial.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Make every following dial fail until cleared.
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Instants of every dial, successful or not.
    pub fn attempts(&self) -> Vec<Instant> {
        self.shared
            .attempts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

/// One accepted connection, seen from the gateway.
pub struct MemoryPeer {
    url: String,
    to_node: Option<mpsc::UnboundedSender<String>>,
    from_node: mpsc::UnboundedReceiver<PeerMessage>,
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push raw text to the node. Returns `false` once the node hung up.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        match &self.to_node {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        match encode_frame(frame) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    pub fn send_event(&self, event: &str, payload: Value, seq: Option<u64>) -> bool {
        self.send_frame(&Frame::Event(EventFrame {
            event: event.to_string(),
            payload,
            seq,
            state_version: None,
        }))
    }

    /// Simulate the gateway dropping the connection.
    pub fn hang_up(&mut self) {
        self.to_node = None;
    }

    pub async fn recv(&mut self) -> Option<PeerMessage> {
        self.from_node.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PeerMessage> {
        self.from_node.try_recv().ok()
    }

    /// Next decodable frame the node sent, skipping pings. `None` on close.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.from_node.recv().await? {
                PeerMessage::Text(text) => {
                    if let Ok(frame) = decode_frame(&text) {
                        return Some(frame);
                    }
                }
                PeerMessage::Ping => {}
                PeerMessage::Close => return None,
            }
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
