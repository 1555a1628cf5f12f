// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event reporting seam with per-event rate limiting.
//!
//! Every notable state transition emits exactly one event through
//! [`EventReporter::report`]; the core never blocks on the reporter. Since
//! bus errors can themselves flood the channel the bus carries, each event
//! id is capped at a configurable count and squelched until the counters
//! are administratively reset.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Event severity mirrored by the external event service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Error,
    Critical,
}

// ============================================================================
// Event Ids
// ============================================================================

pub const EVT_PIPE_ADDED: u16 = 1;
pub const EVT_PIPE_DELETED: u16 = 2;
pub const EVT_SUBSCRIPTION_RCVD: u16 = 3;
pub const EVT_SUBSCRIPTION_REMOVED: u16 = 4;
pub const EVT_UNSUB_NO_MATCH: u16 = 5;
pub const EVT_NO_SUBSCRIBERS: u16 = 6;
pub const EVT_MSG_LIMIT_EXCEEDED: u16 = 7;
pub const EVT_PIPE_OVERFLOW: u16 = 8;
pub const EVT_ALLOC_FAILURE: u16 = 9;
pub const EVT_MSG_TOO_BIG: u16 = 10;
pub const EVT_BAD_ARGUMENT: u16 = 11;
pub const EVT_DUP_SUBSCRIPTION: u16 = 12;
pub const EVT_CMD_BAD_LENGTH: u16 = 13;
pub const EVT_CMD_BAD_CODE: u16 = 14;
pub const EVT_CMD_PROCESSED: u16 = 15;
pub const EVT_REPORT_WRITTEN: u16 = 16;
pub const EVT_ROUTE_TOGGLED: u16 = 17;
pub const EVT_TASK_CLEANUP: u16 = 18;

// ============================================================================
// Reporter Seam
// ============================================================================

/// Event-services seam.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; reports arrive from any caller
/// task. Implementations must not call back into the bus.
pub trait EventReporter: Send + Sync {
    /// Deliver one formatted event. Must not block.
    fn report(&self, event_id: u16, severity: Severity, text: &str);
}

/// Default reporter: forwards events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn report(&self, event_id: u16, severity: Severity, text: &str) {
        match severity {
            Severity::Debug => log::debug!("[EVT {}] {}", event_id, text),
            Severity::Info => log::info!("[EVT {}] {}", event_id, text),
            Severity::Error => log::warn!("[EVT {}] {}", event_id, text),
            Severity::Critical => log::error!("[EVT {}] {}", event_id, text),
        }
    }
}

// ============================================================================
// Rate Limiting
// ============================================================================

/// Per-event-id report ceiling. Counting is monotonic until reset.
#[derive(Debug)]
pub(crate) struct EventLimiter {
    limit: u32,
    counts: HashMap<u16, u32>,
}

impl EventLimiter {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            limit,
            counts: HashMap::new(),
        }
    }

    /// Count one occurrence; `true` while the id is under its ceiling.
    pub(crate) fn allow(&mut self, event_id: u16) -> bool {
        let count = self.counts.entry(event_id).or_insert(0);
        *count += 1;
        *count <= self.limit
    }

    pub(crate) fn reset(&mut self) {
        self.counts.clear();
    }
}

/// Reporter plus limiter, shared by the engine and admin layers.
pub(crate) struct EventPump {
    reporter: Box<dyn EventReporter>,
    limiter: Mutex<EventLimiter>,
}

impl EventPump {
    pub(crate) fn new(reporter: Box<dyn EventReporter>, limit: u32) -> Self {
        Self {
            reporter,
            limiter: Mutex::new(EventLimiter::new(limit)),
        }
    }

    /// Report unless the id is squelched. The limiter lock is dropped
    /// before the reporter runs.
    pub(crate) fn report(&self, event_id: u16, severity: Severity, text: &str) {
        let allowed = self.limiter.lock().allow(event_id);
        if allowed {
            self.reporter.report(event_id, severity, text);
        }
    }

    pub(crate) fn reset_limits(&self) {
        self.limiter.lock().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingReporter(Arc<AtomicUsize>);

    impl EventReporter for CountingReporter {
        fn report(&self, _event_id: u16, _severity: Severity, _text: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_limiter_squelches_after_ceiling() {
        let mut limiter = EventLimiter::new(3);
        assert!(limiter.allow(EVT_PIPE_OVERFLOW));
        assert!(limiter.allow(EVT_PIPE_OVERFLOW));
        assert!(limiter.allow(EVT_PIPE_OVERFLOW));
        assert!(!limiter.allow(EVT_PIPE_OVERFLOW), "fourth is squelched");
        // Independent ids are unaffected.
        assert!(limiter.allow(EVT_NO_SUBSCRIBERS));
    }

    #[test]
    fn test_reset_restores_reporting() {
        let mut limiter = EventLimiter::new(1);
        assert!(limiter.allow(7));
        assert!(!limiter.allow(7));
        limiter.reset();
        assert!(limiter.allow(7));
    }

    #[test]
    fn test_pump_drops_squelched_reports() {
        let hits = Arc::new(AtomicUsize::new(0));
        let pump = EventPump::new(Box::new(CountingReporter(Arc::clone(&hits))), 2);
        for _ in 0..5 {
            pump.report(EVT_PIPE_OVERFLOW, Severity::Error, "full");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        pump.reset_limits();
        pump.report(EVT_PIPE_OVERFLOW, Severity::Error, "full");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
