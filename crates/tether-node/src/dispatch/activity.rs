// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One dispatch outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub succeeded: bool,
    /// `"ok"` or the wire error code.
    pub classification: String,
    pub duration_ms: u64,
}

/// Capacity-bounded log of dispatch outcomes, oldest evicted first.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    records: VecDeque<ActivityRecord>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, record: ActivityRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<ActivityRecord> {
        self.records.iter().cloned().collect()
    }
}
