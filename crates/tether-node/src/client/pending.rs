// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Outbound request correlation.
//!
//! Each request is registered under its id before it is written. The
//! matching response settles it exactly once and removes it; a disconnect
//! settles every remaining entry with [`RequestError::ConnectionLost`].

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::RequestError;
use crate::protocol::{ErrorShape, ResponseFrame};

pub type Reply = oneshot::Sender<Result<Value, RequestError>>;

struct PendingRequest {
    method: String,
    issued_at: Instant,
    reply: Reply,
}

#[derive(Default)]
pub struct PendingRequests {
    entries: HashMap<String, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: String, method: impl Into<String>, reply: Reply) {
        self.entries.insert(
            id,
            PendingRequest {
                method: method.into(),
                issued_at: Instant::now(),
                reply,
            },
        );
    }

    /// Settle the entry matching `res`. Returns `false` for unknown ids.
    pub fn resolve(&mut self, res: ResponseFrame) -> bool {
        let Some(entry) = self.entries.remove(&res.id) else {
            debug!(request_id = %res.id, "response for unknown request dropped");
            return false;
        };
        debug!(
            request_id = %res.id,
            method = %entry.method,
            ok = res.ok,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            "response matched"
        );
        let outcome = if res.ok {
            Ok(res.payload.unwrap_or(Value::Null))
        } else {
            Err(RequestError::Rejected(res.error.unwrap_or_else(|| {
                ErrorShape::new("UNAVAILABLE", "request failed without error details")
            })))
        };
        let _ = entry.reply.send(outcome);
        true
    }

    /// Settle a single entry with `err`.
    pub fn fail(&mut self, id: &str, err: RequestError) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                let _ = entry.reply.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Forget an entry whose caller stopped waiting.
    pub fn abandon(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Settle every entry with `err`. Returns how many were outstanding.
    pub fn reject_all(&mut self, err: RequestError) -> usize {
        let n = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.reply.send(Err(err.clone()));
        }
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn ok_response_resolves_once() {
        let mut p = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        p.insert("a".into(), "node.event", tx);

        assert!(p.resolve(ResponseFrame::success("a", json!({"x": 1}))));
        assert!(!p.resolve(ResponseFrame::success("a", json!({"x": 2}))));
        assert_eq!(rx.await.unwrap().unwrap()["x"], 1);
        assert!(p.is_empty());
    }

    #[tokio::test]
    async fn error_response_rejects_with_shape() {
        let mut p = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        p.insert("a".into(), "m", tx);
        p.resolve(ResponseFrame::failure("a", ErrorShape::new("NOPE", "denied")));
        match rx.await.unwrap() {
            Err(RequestError::Rejected(shape)) => assert_eq!(shape.code, "NOPE"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reject_all_empties_the_map() {
        let mut p = PendingRequests::new();
        let mut rxs = Vec::new();
        for i in 0..5 {
            let (tx, rx) = oneshot::channel();
            p.insert(format!("r{i}"), "m", tx);
            rxs.push(rx);
        }
        assert_eq!(p.reject_all(RequestError::ConnectionLost), 5);
        assert!(p.is_empty());
        for rx in rxs {
            assert!(matches!(rx.await.unwrap(), Err(RequestError::ConnectionLost)));
        }
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut p = PendingRequests::new();
        assert!(!p.resolve(ResponseFrame::success("ghost", Value::Null)));
        assert!(!p.abandon("ghost"));
        assert_eq!(p.len(), 0);
    }
}
