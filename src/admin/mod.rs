// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Administrative command handling.
//!
//! The bus is commanded like any other component: the host subscribes a
//! pipe to the bus command id and feeds received command messages to
//! [`SoftwareBus::handle_command`]. Dispatch is by function code; a
//! malformed or unknown command raises an event and is otherwise ignored
//! (the dispatcher itself only fails on non-command input).

mod snapshot;

pub use snapshot::{BusStats, PipeEntry, RoutingEntry};

use crate::engine::metrics::BusMetrics;
use crate::engine::SoftwareBus;
use crate::error::{Error, Result};
use crate::events::{self, Severity};
use crate::msg::{MsgId, MsgType};

use std::path::Path;
use std::sync::Arc;

pub const FC_NOOP: u8 = 0;
pub const FC_RESET_COUNTERS: u8 = 1;
pub const FC_SEND_STATS: u8 = 2;
pub const FC_WRITE_ROUTING_INFO: u8 = 3;
pub const FC_ENABLE_ROUTE: u8 = 4;
pub const FC_DISABLE_ROUTE: u8 = 5;
pub const FC_WRITE_PIPE_INFO: u8 = 7;
pub const FC_ENABLE_SUB_REPORTING: u8 = 9;
pub const FC_DISABLE_SUB_REPORTING: u8 = 10;
pub const FC_SEND_PREV_SUBS: u8 = 11;

/// Fallback report path when a write command carries no path payload.
const DEFAULT_ROUTING_INFO_FILE: &str = "sb_routing_info.txt";
const DEFAULT_PIPE_INFO_FILE: &str = "sb_pipe_info.txt";

impl SoftwareBus {
    /// Dispatch one received command message.
    ///
    /// Returns `Err` only when `msg` is not a well-formed command at all;
    /// per-command failures (unknown code, bad length) are events plus the
    /// `commands_rejected` counter.
    pub fn handle_command(self: &Arc<Self>, msg: &[u8]) -> Result<()> {
        if self.codec.msg_type(msg)? != MsgType::Command {
            return Err(Error::WrongMessageType);
        }
        let fc = self.codec.function_code(msg)?;
        let payload = self.codec.command_payload(msg)?;

        let outcome = match fc {
            FC_NOOP => {
                self.events.report(
                    events::EVT_CMD_PROCESSED,
                    Severity::Info,
                    &format!("no-op command, version {}", crate::VERSION),
                );
                Ok(())
            }
            FC_RESET_COUNTERS => {
                self.reset_counters();
                Ok(())
            }
            FC_SEND_STATS => self.send_stats(),
            FC_WRITE_ROUTING_INFO => self.cmd_write_report(payload, false),
            FC_WRITE_PIPE_INFO => self.cmd_write_report(payload, true),
            FC_ENABLE_ROUTE => self.cmd_toggle_route(payload, true),
            FC_DISABLE_ROUTE => self.cmd_toggle_route(payload, false),
            FC_ENABLE_SUB_REPORTING => {
                self.set_subscription_reporting(true);
                Ok(())
            }
            FC_DISABLE_SUB_REPORTING => {
                self.set_subscription_reporting(false);
                Ok(())
            }
            FC_SEND_PREV_SUBS => self.send_prev_subs(),
            _ => {
                self.events.report(
                    events::EVT_CMD_BAD_CODE,
                    Severity::Error,
                    &format!("unknown function code {}", fc),
                );
                Err(())
            }
        };

        match outcome {
            Ok(()) => BusMetrics::bump(&self.metrics.commands_processed),
            Err(()) => BusMetrics::bump(&self.metrics.commands_rejected),
        }
        Ok(())
    }

    fn cmd_msg_id(&self, payload: &[u8]) -> std::result::Result<MsgId, ()> {
        if payload.len() < 4 {
            self.events.report(
                events::EVT_CMD_BAD_LENGTH,
                Severity::Error,
                &format!("route command payload {} bytes, need 4", payload.len()),
            );
            return Err(());
        }
        let id = MsgId::new(u32::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]));
        if !self.config.msg_id_valid(id) {
            self.events.report(
                events::EVT_CMD_BAD_CODE,
                Severity::Error,
                &format!("route command: {} out of range", id),
            );
            return Err(());
        }
        Ok(id)
    }

    fn cmd_toggle_route(&self, payload: &[u8], enable: bool) -> std::result::Result<(), ()> {
        let msg_id = self.cmd_msg_id(payload)?;
        match self.set_route_enabled(msg_id, enable) {
            Ok(()) => {
                self.events.report(
                    events::EVT_ROUTE_TOGGLED,
                    Severity::Info,
                    &format!(
                        "route for {} {}",
                        msg_id,
                        if enable { "enabled" } else { "disabled" }
                    ),
                );
                Ok(())
            }
            Err(e) => {
                self.events
                    .report(events::EVT_CMD_BAD_CODE, Severity::Error, &e.to_string());
                Err(())
            }
        }
    }

    /// Payload is a NUL-padded UTF-8 path; empty selects the default file.
    fn cmd_write_report(&self, payload: &[u8], pipes: bool) -> std::result::Result<(), ()> {
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        let default = if pipes {
            DEFAULT_PIPE_INFO_FILE
        } else {
            DEFAULT_ROUTING_INFO_FILE
        };
        let path = match std::str::from_utf8(&payload[..end]) {
            Ok("") => default,
            Ok(p) => p,
            Err(_) => {
                self.events.report(
                    events::EVT_CMD_BAD_LENGTH,
                    Severity::Error,
                    "report path is not valid UTF-8",
                );
                return Err(());
            }
        };
        let written = if pipes {
            self.write_pipe_info(Path::new(path))
        } else {
            self.write_routing_info(Path::new(path))
        };
        match written {
            Ok(entries) => {
                self.events.report(
                    events::EVT_REPORT_WRITTEN,
                    Severity::Info,
                    &format!("{} entries written to {}", entries, path),
                );
                Ok(())
            }
            Err(e) => {
                self.events.report(
                    events::EVT_CMD_BAD_CODE,
                    Severity::Error,
                    &format!("report write to {} failed: {}", path, e),
                );
                Err(())
            }
        }
    }

    /// Emit the statistics telemetry message on the configured id.
    fn send_stats(self: &Arc<Self>) -> std::result::Result<(), ()> {
        let s = self.stats();
        let mut buf = [0u8; 76];
        let total = buf.len();
        if self
            .codec
            .init_message(&mut buf, self.config.stats_msg_id, total)
            .is_err()
        {
            return Err(());
        }
        let mut off = 12;
        let mut put = |v: u64, buf: &mut [u8]| {
            buf[off..off + 8].copy_from_slice(&v.to_be_bytes());
            off += 8;
        };
        put(s.metrics.msgs_sent, &mut buf);
        put(s.metrics.msgs_received, &mut buf);
        put(s.metrics.deliveries, &mut buf);
        put(s.metrics.pipe_overflow_errors, &mut buf);
        put(s.metrics.msg_limit_errors, &mut buf);
        put(s.pipes_in_use as u64, &mut buf);
        put(s.routes_in_use as u64, &mut buf);
        put(s.subscriptions_in_use as u64, &mut buf);
        if let Err(e) = self.send(&buf) {
            self.events
                .report(events::EVT_CMD_BAD_CODE, Severity::Error, &e.to_string());
            return Err(());
        }
        Ok(())
    }

    /// Broadcast every Global-scope subscription in fixed-size batches on
    /// the subscription-report id.
    fn send_prev_subs(self: &Arc<Self>) -> std::result::Result<(), ()> {
        let subs: Vec<(MsgId, crate::route::Qos, u16)> = self.with_shared(|s| {
            let mut out = Vec::new();
            for (ridx, route) in s.routes.iter_routes() {
                for (_, dest) in s.routes.destinations(ridx) {
                    if dest.scope == crate::route::SubscriptionScope::Global {
                        out.push((route.key.msg_id(), dest.qos, dest.msg_limit));
                    }
                }
            }
            out
        });

        let batch = self.config.prev_subs_batch.max(1);
        for (seg, chunk) in subs.chunks(batch).enumerate() {
            // Header + segment descriptor + 8 bytes per entry.
            let total = 16 + 8 * chunk.len();
            let mut buf = vec![0u8; total];
            if self
                .codec
                .init_message(&mut buf, self.config.sub_report_msg_id, total)
                .is_err()
            {
                return Err(());
            }
            buf[12..14].copy_from_slice(&(seg as u16 + 1).to_be_bytes());
            buf[14..16].copy_from_slice(&(chunk.len() as u16).to_be_bytes());
            let mut off = 16;
            for (msg_id, qos, msg_limit) in chunk {
                buf[off..off + 4].copy_from_slice(&msg_id.value().to_be_bytes());
                buf[off + 4] = qos.priority;
                buf[off + 5] = qos.reliability;
                buf[off + 6..off + 8].copy_from_slice(&msg_limit.to_be_bytes());
                off += 8;
            }
            if let Err(e) = self.send_ex(&buf, false) {
                self.events
                    .report(events::EVT_CMD_BAD_CODE, Severity::Error, &e.to_string());
                return Err(());
            }
        }
        Ok(())
    }
}
