// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus engine counters for housekeeping telemetry.
//!
//! All fields use relaxed atomics; consumers only need monotonic
//! snapshots for observability.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct BusMetrics {
    pub msgs_sent: AtomicU64,
    pub msgs_received: AtomicU64,
    pub deliveries: AtomicU64,
    pub no_subscribers: AtomicU64,
    pub pipe_overflow_errors: AtomicU64,
    pub msg_limit_errors: AtomicU64,
    pub bad_arg_errors: AtomicU64,
    pub msg_too_big_errors: AtomicU64,
    pub alloc_failures: AtomicU64,
    pub commands_processed: AtomicU64,
    pub commands_rejected: AtomicU64,
}

impl BusMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            msgs_sent: self.msgs_sent.load(Ordering::Relaxed),
            msgs_received: self.msgs_received.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            no_subscribers: self.no_subscribers.load(Ordering::Relaxed),
            pipe_overflow_errors: self.pipe_overflow_errors.load(Ordering::Relaxed),
            msg_limit_errors: self.msg_limit_errors.load(Ordering::Relaxed),
            bad_arg_errors: self.bad_arg_errors.load(Ordering::Relaxed),
            msg_too_big_errors: self.msg_too_big_errors.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.msgs_sent.store(0, Ordering::Relaxed);
        self.msgs_received.store(0, Ordering::Relaxed);
        self.deliveries.store(0, Ordering::Relaxed);
        self.no_subscribers.store(0, Ordering::Relaxed);
        self.pipe_overflow_errors.store(0, Ordering::Relaxed);
        self.msg_limit_errors.store(0, Ordering::Relaxed);
        self.bad_arg_errors.store(0, Ordering::Relaxed);
        self.msg_too_big_errors.store(0, Ordering::Relaxed);
        self.alloc_failures.store(0, Ordering::Relaxed);
        self.commands_processed.store(0, Ordering::Relaxed);
        self.commands_rejected.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub msgs_sent: u64,
    pub msgs_received: u64,
    pub deliveries: u64,
    pub no_subscribers: u64,
    pub pipe_overflow_errors: u64,
    pub msg_limit_errors: u64,
    pub bad_arg_errors: u64,
    pub msg_too_big_errors: u64,
    pub alloc_failures: u64,
    pub commands_processed: u64,
    pub commands_rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let m = BusMetrics::new();
        BusMetrics::bump(&m.msgs_sent);
        BusMetrics::bump(&m.msgs_sent);
        BusMetrics::bump(&m.no_subscribers);
        let snap = m.snapshot();
        assert_eq!(snap.msgs_sent, 2);
        assert_eq!(snap.no_subscribers, 1);

        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
