// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Point-in-time views of the routing state for ground reporting.

use crate::engine::{MetricsSnapshot, SoftwareBus};
use crate::msg::MsgId;
use crate::pipe::PipeId;
use crate::pool::PoolStats;
use crate::route::Qos;

use std::io::Write;
use std::path::Path;

/// Bus-wide statistics telemetry payload.
#[derive(Debug, Clone)]
pub struct BusStats {
    pub metrics: MetricsSnapshot,
    pub pool: PoolStats,
    pub pipes_in_use: usize,
    pub max_pipes: usize,
    pub routes_in_use: usize,
    pub max_routes: usize,
    pub subscriptions_in_use: usize,
    pub max_subscriptions: usize,
}

/// One destination row of the routing report.
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub msg_id: MsgId,
    pub pipe: PipeId,
    pub pipe_name: String,
    pub qos: Qos,
    pub msg_limit: u16,
    pub in_flight: u16,
    pub active: bool,
    pub route_enabled: bool,
}

/// One pipe row of the pipe report.
#[derive(Debug, Clone)]
pub struct PipeEntry {
    pub pipe: PipeId,
    pub name: String,
    pub owner: String,
    pub depth: usize,
    pub occupancy: usize,
}

impl SoftwareBus {
    /// Capture bus-wide usage and counter statistics.
    pub fn stats(&self) -> BusStats {
        let (pipes_in_use, routes_in_use, subscriptions_in_use) = self.with_shared(|s| {
            (
                s.pipes.pipes_in_use(),
                s.routes.routes_in_use(),
                s.routes.subscriptions_in_use(),
            )
        });
        BusStats {
            metrics: self.metrics_snapshot(),
            pool: self.pool_stats(),
            pipes_in_use,
            max_pipes: self.config.max_pipes,
            routes_in_use,
            max_routes: self.config.max_routes,
            subscriptions_in_use,
            max_subscriptions: self.config.max_subscriptions,
        }
    }

    /// All destinations, route-major, as report rows.
    pub fn routing_entries(&self) -> Vec<RoutingEntry> {
        self.with_shared(|s| {
            let mut out = Vec::with_capacity(s.routes.subscriptions_in_use());
            for (ridx, route) in s.routes.iter_routes() {
                for (_, dest) in s.routes.destinations(ridx) {
                    let pipe_name = s
                        .pipes
                        .get(dest.pipe)
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    out.push(RoutingEntry {
                        msg_id: route.key.msg_id(),
                        pipe: dest.pipe,
                        pipe_name,
                        qos: dest.qos,
                        msg_limit: dest.msg_limit,
                        in_flight: dest.in_flight,
                        active: dest.active,
                        route_enabled: route.enabled,
                    });
                }
            }
            out
        })
    }

    /// All live pipes as report rows.
    pub fn pipe_entries(&self) -> Vec<PipeEntry> {
        // Owner names resolve through the task registry, which must not be
        // called while the routing lock is held.
        let rows: Vec<(PipeId, String, crate::tasks::TaskId, usize, usize)> =
            self.with_shared(|s| {
                s.pipes
                    .iter()
                    .map(|p| (p.id, p.name.clone(), p.owner, p.depth, p.occupancy()))
                    .collect()
            });
        rows.into_iter()
            .map(|(pipe, name, owner, depth, occupancy)| PipeEntry {
                pipe,
                name,
                owner: self.tasks.task_name(owner),
                depth,
                occupancy,
            })
            .collect()
    }

    /// Write the routing report as text to `path`.
    pub fn write_routing_info(&self, path: &Path) -> std::io::Result<usize> {
        let entries = self.routing_entries();
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        writeln!(
            file,
            "{:<10} {:<6} {:<16} {:>4} {:>4} {:>6} {:>6} {:>7} {:>8}",
            "MSGID", "PIPE", "NAME", "PRI", "REL", "LIMIT", "FLIGHT", "ACTIVE", "ROUTE"
        )?;
        for e in &entries {
            writeln!(
                file,
                "{:<10} {:<6} {:<16} {:>4} {:>4} {:>6} {:>6} {:>7} {:>8}",
                e.msg_id.to_string(),
                e.pipe.to_string(),
                e.pipe_name,
                e.qos.priority,
                e.qos.reliability,
                e.msg_limit,
                e.in_flight,
                e.active,
                if e.route_enabled { "ENA" } else { "DIS" },
            )?;
        }
        file.flush()?;
        Ok(entries.len())
    }

    /// Write the pipe report as text to `path`.
    pub fn write_pipe_info(&self, path: &Path) -> std::io::Result<usize> {
        let entries = self.pipe_entries();
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        writeln!(
            file,
            "{:<6} {:<16} {:<16} {:>6} {:>6}",
            "PIPE", "NAME", "OWNER", "DEPTH", "USED"
        )?;
        for e in &entries {
            writeln!(
                file,
                "{:<6} {:<16} {:<16} {:>6} {:>6}",
                e.pipe.to_string(),
                e.name,
                e.owner,
                e.depth,
                e.occupancy,
            )?;
        }
        file.flush()?;
        Ok(entries.len())
    }
}
