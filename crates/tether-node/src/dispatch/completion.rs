// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! At-most-once bridge from callback-style platform APIs to a future.
//!
//! A platform delegate may report the same outcome more than once (a late
//! error after a success, a duplicate callback). [`Completion::resolve`]
//! accepts the first value and ignores the rest; the waiting side sees
//! exactly one result.
//!
//! ```rust
//! use tether_node::dispatch::{completion, CapabilityError};
//!
//! // A delegate that calls back twice: a fix, then a stray timeout.
//! fn request_fix(on_done: impl Fn(Result<f64, CapabilityError>) + Send + 'static) {
//!     std::thread::spawn(move || {
//!         on_done(Ok(59.33));
//!         on_done(Err(CapabilityError::Timeout));
//!     });
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), CapabilityError> {
//! let (done, pending) = completion();
//! request_fix(move |outcome| {
//!     done.resolve(outcome);
//! });
//! let lat = pending.wait().await??;
//! assert_eq!(lat, 59.33);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::CapabilityError;

/// Resolving half. Cheap to clone into several callbacks.
pub struct Completion<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

/// Waiting half.
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

/// Create a linked completion pair.
pub fn completion<T>() -> (Completion<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completion {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        Pending { rx },
    )
}

impl<T> Completion<T> {
    /// Deliver `value` if nothing was delivered before. Returns whether this
    /// call won.
    pub fn resolve(&self, value: T) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self.slot.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl<T> Pending<T> {
    /// Wait for the single result. Dropping every resolver first is an error.
    pub async fn wait(self) -> Result<T, CapabilityError> {
        self.rx
            .await
            .map_err(|_| CapabilityError::Other("completion dropped without a result".into()))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_resolution_wins() {
        let (done, pending) = completion::<u32>();
        let again = done.clone();
        assert!(done.resolve(1));
        assert!(!again.resolve(2));
        assert!(again.is_resolved());
        assert_eq!(pending.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn resolution_from_another_task() {
        let (done, pending) = completion::<&'static str>();
        tokio::spawn(async move {
            done.resolve("captured");
        });
        assert_eq!(pending.wait().await.unwrap(), "captured");
    }

    #[tokio::test]
    async fn dropped_resolver_is_an_error() {
        let (done, pending) = completion::<u32>();
        drop(done);
        assert!(pending.wait().await.is_err());
    }
}
