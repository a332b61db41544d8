// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::node::EngineEvent;

/// Post a `KeepaliveTick` every `period`, first one a full period from now.
///
/// The owner task sends the actual ping, so a tick that arrives after the
/// connection was replaced is recognised by its generation and dropped.
pub(crate) fn spawn_keepalive(
    period: Duration,
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.send(EngineEvent::KeepaliveTick { generation }).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_keepalive(Duration::from_secs(15), 7, tx);

        tokio::time::sleep(Duration::from_millis(14_900)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(30_200)).await;
        let mut ticks = 0;
        while let Ok(ev) = rx.try_recv() {
            assert!(matches!(ev, EngineEvent::KeepaliveTick { generation: 7 }));
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        task.abort();
    }
}
