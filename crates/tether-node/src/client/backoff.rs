// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tether_config::ReconnectConfig;

/// Reason recorded once the retry budget is spent.
pub const MAX_ATTEMPTS_REASON: &str = "max reconnection attempts reached";

/// Exponential reconnect schedule: `initial * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(cfg.initial_delay_ms),
            max: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// budget is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_then_caps() {
        let p = ReconnectPolicy::default();
        let secs: Vec<u64> = (1..=10)
            .map(|n| p.delay_for(n).unwrap().as_secs())
            .collect();
        assert_eq!(secs, [1, 2, 4, 8, 16, 30, 30, 30, 30, 30]);
        assert_eq!(p.delay_for(11), None);
    }

    #[test]
    fn large_attempt_numbers_do_not_overflow() {
        let p = ReconnectPolicy {
            max_attempts: u32::MAX,
            ..ReconnectPolicy::default()
        };
        assert_eq!(p.delay_for(64), Some(Duration::from_secs(30)));
        assert_eq!(p.delay_for(0), None);
    }
}
