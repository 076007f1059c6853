// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live per-subscription counters, updated by the polling task.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    frames_seen: AtomicU64,
    delivered: AtomicU64,
    filtered: AtomicU64,
    integrity_skipped: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
    poll_errors: AtomicU64,
}

/// Point-in-time copy of [`SubscriptionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Frames returned by the buffer past the cursor.
    pub frames_seen: u64,
    /// Messages handed to the handler.
    pub delivered: u64,
    /// Frames for another key.
    pub filtered: u64,
    /// Frames dropped on a checksum or length failure.
    pub integrity_skipped: u64,
    /// Matching frames whose message could not be deserialized.
    pub decode_failures: u64,
    /// Handler invocations that panicked.
    pub handler_failures: u64,
    /// Failed buffer reads.
    pub poll_errors: u64,
}

impl SubscriptionStats {
    pub(crate) fn record_frame(&self) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_integrity_skip(&self) {
        self.integrity_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            integrity_skipped: self.integrity_skipped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}
