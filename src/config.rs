// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus platform configuration - single source of truth.
//!
//! Every platform ceiling the routing core honors lives here: pipe, route
//! and destination counts, message and queue sizing, buffer pool size
//! classes, and the two header-layout valid ranges. The engine reads the
//! configuration once at construction and treats it as immutable for the
//! process lifetime. **Never hardcode a limit elsewhere!**

use crate::msg::MsgId;

// =======================================================================
// Platform Defaults
// =======================================================================

/// Default maximum number of pipes alive at once.
pub const DEFAULT_MAX_PIPES: usize = 64;

/// Default maximum number of distinct routed message ids.
pub const DEFAULT_MAX_ROUTES: usize = 256;

/// Default ceiling on destinations attached to a single route.
pub const DEFAULT_MAX_DESTS_PER_ROUTE: usize = 16;

/// Default ceiling on total destination nodes across all routes.
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 512;

/// Default maximum total message size in bytes (headers included).
pub const DEFAULT_MAX_MSG_SIZE: usize = 32_768;

/// Default maximum pipe queue depth.
pub const DEFAULT_MAX_PIPE_DEPTH: usize = 256;

/// Default per-destination in-flight message limit applied by
/// plain `subscribe` (callers wanting another value use `subscribe_ex`).
pub const DEFAULT_MSG_LIMIT: u16 = 4;

/// Default ceiling applied to one event id before the rate limiter
/// squelches it (see `events::EventLimiter`).
pub const DEFAULT_EVENT_LIMIT: u32 = 16;

/// Default number of subscription entries packed into one
/// previous-subscriptions report batch.
pub const DEFAULT_PREV_SUBS_BATCH: usize = 20;

/// Highest valid message id under the version-1 header layout.
///
/// Version-1 ids are carried directly in the 16-bit stream-id field; the
/// top three bits are reserved (version flag + type + secondary-header).
pub const DEFAULT_MAX_MSG_ID_V1: u32 = 0x1FFF;

/// Buffer pool size classes as `(block_size, max_blocks)` pairs.
///
/// Best-fit selection walks this table smallest-first and falls back to
/// larger classes when a class is exhausted.
pub const DEFAULT_POOL_CLASSES: &[(usize, usize)] = &[
    (64, 64),     // 64B x 64 = 4 KB
    (128, 64),    // 128B x 64 = 8 KB
    (256, 64),    // 256B x 64 = 16 KB
    (512, 64),    // 512B x 64 = 32 KB
    (1024, 32),   // 1KB x 32 = 32 KB
    (4096, 32),   // 4KB x 32 = 128 KB
    (16384, 16),  // 16KB x 16 = 256 KB
    (65536, 8),   // 64KB x 8 = 512 KB
];

// =======================================================================
// Version-2 MessageId Layout
// =======================================================================

/// Bit widths of the version-2 message id fields.
///
/// The exact split between ApId and Subsystem bits is mission
/// configuration, not a constant: a version-2 id is synthesized as
/// `subsystem << (apid_bits + 1) | type_bit << apid_bits | apid`.
/// The version-2 valid-range ceiling is derived from these widths and is
/// independent of the version-1 ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgIdLayout {
    /// Width of the ApId field (low bits). Default 7, maximum 11.
    pub apid_bits: u8,
    /// Width of the Subsystem field (high bits). Default 9, maximum 9.
    pub subsystem_bits: u8,
}

impl MsgIdLayout {
    /// Highest message id representable under this layout.
    pub fn max_msg_id(&self) -> u32 {
        // apid + type bit + subsystem
        let width = u32::from(self.apid_bits) + 1 + u32::from(self.subsystem_bits);
        (1u32 << width) - 1
    }

    /// Mask covering the ApId field.
    pub fn apid_mask(&self) -> u32 {
        (1u32 << self.apid_bits) - 1
    }

    /// Bit position of the type bit within the synthesized id.
    pub fn type_shift(&self) -> u32 {
        u32::from(self.apid_bits)
    }

    /// Bit position of the subsystem field within the synthesized id.
    pub fn subsystem_shift(&self) -> u32 {
        u32::from(self.apid_bits) + 1
    }

    /// Mask covering the subsystem field (before shifting).
    pub fn subsystem_mask(&self) -> u32 {
        (1u32 << self.subsystem_bits) - 1
    }
}

impl Default for MsgIdLayout {
    fn default() -> Self {
        Self {
            apid_bits: 7,
            subsystem_bits: 9,
        }
    }
}

// =======================================================================
// Bus Configuration
// =======================================================================

/// Immutable platform configuration consumed once by [`crate::SoftwareBus::new`].
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum number of concurrently existing pipes.
    pub max_pipes: usize,
    /// Maximum number of routed message ids.
    pub max_routes: usize,
    /// Maximum destinations on a single route.
    pub max_dests_per_route: usize,
    /// Maximum destination nodes across all routes.
    pub max_subscriptions: usize,
    /// Maximum total message size in bytes.
    pub max_msg_size: usize,
    /// Maximum pipe queue depth accepted by `create_pipe`.
    pub max_pipe_depth: usize,
    /// In-flight limit applied by plain `subscribe`.
    pub default_msg_limit: u16,
    /// Highest valid version-1 message id.
    pub max_msg_id_v1: u32,
    /// Version-2 id bit layout (ceiling derived from the widths).
    pub msg_id_layout: MsgIdLayout,
    /// Buffer pool size classes `(block_size, max_blocks)`.
    pub pool_classes: Vec<(usize, usize)>,
    /// Per-event-id report ceiling before squelch.
    pub event_limit: u32,
    /// Message id used for subscription reports when reporting is enabled.
    pub sub_report_msg_id: MsgId,
    /// Message id used for housekeeping statistics telemetry.
    pub stats_msg_id: MsgId,
    /// Entries per previous-subscriptions batch message.
    pub prev_subs_batch: usize,
}

impl BusConfig {
    /// Highest message id valid under *either* header layout. Used by the
    /// routing side (subscribe/unsubscribe) which does not know which
    /// layout a future publisher will use.
    pub fn max_msg_id(&self) -> u32 {
        self.max_msg_id_v1.max(self.msg_id_layout.max_msg_id())
    }

    /// True when `id` lies in the configured valid range.
    pub fn msg_id_valid(&self, id: MsgId) -> bool {
        id.value() <= self.max_msg_id()
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_pipes: DEFAULT_MAX_PIPES,
            max_routes: DEFAULT_MAX_ROUTES,
            max_dests_per_route: DEFAULT_MAX_DESTS_PER_ROUTE,
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_pipe_depth: DEFAULT_MAX_PIPE_DEPTH,
            default_msg_limit: DEFAULT_MSG_LIMIT,
            max_msg_id_v1: DEFAULT_MAX_MSG_ID_V1,
            msg_id_layout: MsgIdLayout::default(),
            pool_classes: DEFAULT_POOL_CLASSES.to_vec(),
            event_limit: DEFAULT_EVENT_LIMIT,
            sub_report_msg_id: MsgId::new(0x0E01),
            stats_msg_id: MsgId::new(0x0E02),
            prev_subs_batch: DEFAULT_PREV_SUBS_BATCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_ceiling() {
        let layout = MsgIdLayout::default();
        // 9 + 1 + 7 = 17 bits
        assert_eq!(layout.max_msg_id(), 0x1_FFFF);
        assert_eq!(layout.type_shift(), 7);
        assert_eq!(layout.subsystem_shift(), 8);
    }

    #[test]
    fn test_custom_layout_ceiling() {
        let layout = MsgIdLayout {
            apid_bits: 11,
            subsystem_bits: 4,
        };
        assert_eq!(layout.max_msg_id(), 0xFFFF);
        assert_eq!(layout.apid_mask(), 0x7FF);
    }

    #[test]
    fn test_config_valid_range_covers_both_versions() {
        let config = BusConfig::default();
        assert!(config.msg_id_valid(MsgId::new(0x1FFF)));
        assert!(config.msg_id_valid(MsgId::new(0x1_FFFF)));
        assert!(!config.msg_id_valid(MsgId::new(0x2_0000)));
    }
}
