// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use super::capability::LocationFix;
use crate::protocol::commands::LocationAccuracy;

struct CachedFix {
    at: Instant,
    accuracy: LocationAccuracy,
    fix: LocationFix,
}

/// Remembers the most recent fix, when it was acquired and how precise the
/// request that produced it was.
#[derive(Default)]
pub struct LocationCache {
    last: Mutex<Option<CachedFix>>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached fix if it is no older than `max_age` and was taken for a
    /// request at least as precise as `wanted`.
    pub fn fresh(&self, max_age: Duration, wanted: LocationAccuracy) -> Option<LocationFix> {
        let guard = self.last.lock().ok()?;
        let cached = guard.as_ref()?;
        (cached.at.elapsed() <= max_age && cached.accuracy >= wanted).then(|| cached.fix.clone())
    }

    pub fn store(&self, accuracy: LocationAccuracy, fix: LocationFix) {
        if let Ok(mut guard) = self.last.lock() {
            *guard = Some(CachedFix {
                at: Instant::now(),
                accuracy,
                fix,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix() -> LocationFix {
        LocationFix {
            lat: 1.0,
            lon: 2.0,
            accuracy_meters: 5.0,
            altitude_meters: None,
            speed_mps: None,
            heading_deg: None,
            timestamp: 0,
            is_precise: true,
            source: "gps".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fix_expires_after_max_age() {
        let cache = LocationCache::new();
        let minute = Duration::from_secs(60);
        assert!(cache.fresh(minute, LocationAccuracy::Coarse).is_none());

        cache.store(LocationAccuracy::Balanced, fix());
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(cache
            .fresh(Duration::from_millis(500), LocationAccuracy::Balanced)
            .is_some());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(cache
            .fresh(Duration::from_millis(500), LocationAccuracy::Balanced)
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn coarse_fix_never_answers_a_precise_request() {
        let cache = LocationCache::new();
        let minute = Duration::from_secs(60);

        cache.store(LocationAccuracy::Coarse, fix());
        assert!(cache.fresh(minute, LocationAccuracy::Coarse).is_some());
        assert!(cache.fresh(minute, LocationAccuracy::Precise).is_none());

        cache.store(LocationAccuracy::Precise, fix());
        assert!(cache.fresh(minute, LocationAccuracy::Coarse).is_some());
        assert!(cache.fresh(minute, LocationAccuracy::Balanced).is_some());
    }
}
