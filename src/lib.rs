// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # OSB - Onboard Software Bus
//!
//! A pure Rust publish/subscribe message bus for flight-software style
//! systems: command and telemetry messages are routed by message id from
//! any sender to every subscribed pipe, with zero-copy fan-out through a
//! reference-counted buffer pool.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use osb::{BusConfig, MsgId, ReceiveTimeout, SoftwareBus};
//!
//! fn main() -> osb::Result<()> {
//!     let bus = SoftwareBus::with_defaults(BusConfig::default());
//!
//!     // Create a pipe and subscribe it to a telemetry id
//!     let pipe = bus.create_pipe(16, "HK_PIPE")?;
//!     bus.subscribe(MsgId::new(0x0810), pipe)?;
//!
//!     // Publish a message built with the bus codec
//!     let mut msg = [0u8; 32];
//!     bus.codec().init_message(&mut msg, MsgId::new(0x0810), 32)?;
//!     bus.send(&msg)?;
//!
//!     // Receive it back
//!     let received = bus.receive(pipe, ReceiveTimeout::Poll)?;
//!     assert_eq!(received.msg_id(), MsgId::new(0x0810));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      Application Tasks                       |
//! |        send / receive / subscribe / zero_copy_get            |
//! +--------------------------------------------------------------+
//! |                           Engine                             |
//! |   routing | fan-out policy | sequence stamping | metrics     |
//! +--------------------------------------------------------------+
//! |   Route Table    |    Pipe Table    |     Buffer Pool        |
//! |  id -> dest list |  bounded queues  |  refcounted classes    |
//! +--------------------------------------------------------------+
//! |                          Codec                               |
//! |     primary/secondary headers, two id layouts (v1/v2)        |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SoftwareBus`] | The bus instance, factory for pipes and buffers |
//! | [`MsgCodec`] | Header codec bound to the configured id layout |
//! | [`Message`] | A received message, releases its buffer on drop |
//! | [`ZeroCopyBuffer`] | Pool buffer leased for in-place construction |
//! | [`BusConfig`] | Immutable platform configuration |
//!
//! ## Modules Overview
//!
//! - [`engine`] - Send/receive/subscription engine (start here)
//! - [`msg`] - Message header codec
//! - [`pool`] - Reference-counted buffer pool
//! - [`admin`] - Administrative commands and reports
//! - [`events`] - Event reporting seam
//! - [`tasks`] - Task identity seam

/// Administrative command dispatch and status reports.
pub mod admin;
/// Immutable platform configuration.
pub mod config;
/// Send/receive/subscription engine.
pub mod engine;
/// Bus error type.
pub mod error;
/// Event reporting seam and event ids.
pub mod events;
/// Message header codec (two id layouts).
pub mod msg;
/// Pipes: bounded per-subscriber delivery queues.
pub mod pipe;
/// Reference-counted buffer pool.
pub mod pool;
/// Route table: message id to destination list.
pub mod route;
/// Task identity seam.
pub mod tasks;

pub use admin::{BusStats, PipeEntry, RoutingEntry};
pub use config::{BusConfig, MsgIdLayout};
pub use engine::{Message, MetricsSnapshot, SoftwareBus, ZeroCopyBuffer};
pub use error::{Error, Result};
pub use events::{EventReporter, LogReporter, Severity};
pub use msg::{MsgCodec, MsgId, MsgTime, MsgType};
pub use pipe::{PipeId, PipeOptions, ReceiveTimeout};
pub use pool::{BufHandle, PoolStats};
pub use route::{Qos, SubscriptionScope};
pub use tasks::{LocalTaskRegistry, TaskId, TaskRegistry};

/// OSB version string.
pub const VERSION: &str = "0.2.0";
