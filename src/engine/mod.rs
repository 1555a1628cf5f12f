// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus engine: ties codec, pool, route table and pipes together.
//!
//! The engine is a shared-state library invoked directly by caller tasks;
//! there is no server thread. One lock guards the routing state (route
//! table plus pipe registry); the buffer pool has its own innermost lock;
//! each pipe queue synchronizes independently so a blocked receive never
//! holds up routing mutation.
//!
//! # Delivery policy
//!
//! A send allocates one shared buffer and reference-counts it once per
//! delivered destination (zero-copy fan-out). A full or limited
//! destination is skipped with a notice; the send as a whole still
//! succeeds. Sending with no subscribers is a notice as well, never an
//! error.

pub(crate) mod metrics;
mod zerocopy;

pub use metrics::MetricsSnapshot;
pub use zerocopy::ZeroCopyBuffer;

use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::events::{self, EventPump, EventReporter, LogReporter, Severity};
use crate::msg::{MsgCodec, MsgId, MsgType};
use crate::pipe::{Delivery, Pipe, PipeId, PipeOptions, PipeTable, ReceiveTimeout};
use crate::pool::{BufHandle, BufferPool, PoolStats};
use crate::route::{Qos, RouteKey, RouteTable, SubscribeOutcome, SubscriptionScope, UnsubscribeOutcome};
use crate::tasks::{LocalTaskRegistry, TaskId, TaskRegistry};

use metrics::BusMetrics;
use parking_lot::{MappedMutexGuard, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Routing state guarded by the engine lock.
pub(crate) struct Shared {
    pub(crate) routes: RouteTable,
    pub(crate) pipes: PipeTable,
    /// Zero-copy buffers handed out but not yet sent, per owning task.
    pending_zc: Vec<(TaskId, BufHandle)>,
}

/// The software bus: publish/subscribe message routing core.
///
/// Constructed once per process with [`SoftwareBus::new`]; every API call
/// takes the returned handle. No ambient globals.
pub struct SoftwareBus {
    pub(crate) config: BusConfig,
    pub(crate) codec: MsgCodec,
    pub(crate) pool: BufferPool,
    pub(crate) shared: Mutex<Shared>,
    pub(crate) metrics: BusMetrics,
    pub(crate) events: EventPump,
    pub(crate) tasks: Arc<dyn TaskRegistry>,
    sub_reporting: AtomicBool,
}

impl SoftwareBus {
    /// Build the bus from immutable platform configuration and its two
    /// external collaborators.
    pub fn new(
        config: BusConfig,
        tasks: Arc<dyn TaskRegistry>,
        reporter: Box<dyn EventReporter>,
    ) -> Arc<Self> {
        let codec = MsgCodec::new(&config);
        let pool = BufferPool::new(&config.pool_classes);
        let shared = Shared {
            routes: RouteTable::new(
                config.max_routes,
                config.max_dests_per_route,
                config.max_subscriptions,
            ),
            pipes: PipeTable::new(config.max_pipes),
            pending_zc: Vec::new(),
        };
        let events = EventPump::new(reporter, config.event_limit);
        Arc::new(Self {
            config,
            codec,
            pool,
            shared: Mutex::new(shared),
            metrics: BusMetrics::new(),
            events,
            tasks,
            sub_reporting: AtomicBool::new(false),
        })
    }

    /// Bus with a thread-keyed task registry and `log`-backed events.
    pub fn with_defaults(config: BusConfig) -> Arc<Self> {
        Self::new(
            config,
            Arc::new(LocalTaskRegistry::new()),
            Box::new(LogReporter),
        )
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Message codec bound to this bus's header configuration.
    pub fn codec(&self) -> &MsgCodec {
        &self.codec
    }

    /// Buffer pool usage statistics for housekeeping.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Zero the engine counters and re-arm the event rate limiter.
    pub fn reset_counters(&self) {
        self.metrics.reset();
        self.events.reset_limits();
    }

    // ------------------------------------------------------------------
    // Pipes
    // ------------------------------------------------------------------

    /// Create a pipe of `depth` entries owned by the calling task.
    pub fn create_pipe(&self, depth: usize, name: &str) -> Result<PipeId> {
        let owner = self.tasks.current_task();
        let created = {
            let mut shared = self.shared.lock();
            shared
                .pipes
                .create(depth, self.config.max_pipe_depth, name, owner)
        };
        match created {
            Ok(pipe) => {
                self.events.report(
                    events::EVT_PIPE_ADDED,
                    Severity::Debug,
                    &format!(
                        "{} '{}' created by {} (depth {})",
                        pipe.id,
                        name,
                        self.tasks.task_name(owner),
                        depth
                    ),
                );
                Ok(pipe.id)
            }
            Err(e) => {
                BusMetrics::bump(&self.metrics.bad_arg_errors);
                self.events.report(
                    events::EVT_BAD_ARGUMENT,
                    Severity::Error,
                    &format!("create_pipe '{}' failed: {}", name, e),
                );
                Err(e)
            }
        }
    }

    /// Delete an owned pipe: every destination referencing it is swept
    /// from the route table (O(total subscriptions)) and queued buffers
    /// are released.
    pub fn delete_pipe(&self, pipe_id: PipeId) -> Result<()> {
        let caller = self.tasks.current_task();
        self.delete_pipe_impl(pipe_id, Some(caller))
    }

    fn delete_pipe_impl(&self, pipe_id: PipeId, caller: Option<TaskId>) -> Result<()> {
        let mut shared = self.shared.lock();
        let pipe = shared
            .pipes
            .get(pipe_id)
            .ok_or_else(|| Error::BadArgument(format!("unknown {}", pipe_id)))?;
        if let Some(caller) = caller {
            if pipe.owner != caller {
                return Err(Error::BadArgument(format!(
                    "{} not owned by caller {}",
                    pipe_id, caller
                )));
            }
        }
        let removed_subs = shared.routes.remove_pipe(pipe_id);
        let pipe = shared.pipes.remove(pipe_id)?;
        pipe.close();
        let drained = pipe.drain();
        for d in &drained {
            let _ = self.pool.release(d.handle);
        }
        drop(shared);

        self.events.report(
            events::EVT_PIPE_DELETED,
            Severity::Debug,
            &format!(
                "{} '{}' deleted ({} subscriptions swept, {} queued buffers released)",
                pipe_id,
                pipe.name,
                removed_subs,
                drained.len()
            ),
        );
        Ok(())
    }

    /// Pipe options; owner-only.
    pub fn pipe_options(&self, pipe_id: PipeId) -> Result<PipeOptions> {
        let pipe = self.owned_pipe(pipe_id)?;
        let opts = *pipe.opts.lock();
        Ok(opts)
    }

    /// Set pipe options; owner-only.
    pub fn set_pipe_options(&self, pipe_id: PipeId, opts: PipeOptions) -> Result<()> {
        let pipe = self.owned_pipe(pipe_id)?;
        *pipe.opts.lock() = opts;
        Ok(())
    }

    fn owned_pipe(&self, pipe_id: PipeId) -> Result<Arc<Pipe>> {
        let caller = self.tasks.current_task();
        let shared = self.shared.lock();
        let pipe = shared
            .pipes
            .get(pipe_id)
            .ok_or_else(|| Error::BadArgument(format!("unknown {}", pipe_id)))?;
        if pipe.owner != caller {
            return Err(Error::BadArgument(format!(
                "{} not owned by caller {}",
                pipe_id, caller
            )));
        }
        Ok(pipe)
    }

    /// Delete every pipe owned by `task` and release its unsent zero-copy
    /// buffers. Invoked by the executive layer when a task terminates.
    pub fn cleanup_task(&self, task: TaskId) {
        let owned = {
            let shared = self.shared.lock();
            shared.pipes.owned_by(task)
        };
        for pipe_id in &owned {
            // Unchecked: the terminating task is not the caller here.
            let _ = self.delete_pipe_impl(*pipe_id, None);
        }

        let pending = {
            let mut shared = self.shared.lock();
            let mut mine = Vec::new();
            shared.pending_zc.retain(|&(owner, handle)| {
                if owner == task {
                    mine.push(handle);
                    false
                } else {
                    true
                }
            });
            mine
        };
        for handle in &pending {
            let _ = self.pool.release(*handle);
        }

        self.events.report(
            events::EVT_TASK_CLEANUP,
            Severity::Debug,
            &format!(
                "cleanup of {}: {} pipes deleted, {} zero-copy buffers released",
                self.tasks.task_name(task),
                owned.len(),
                pending.len()
            ),
        );
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe `pipe_id` to `msg_id` with default QoS and limit.
    pub fn subscribe(&self, msg_id: MsgId, pipe_id: PipeId) -> Result<()> {
        self.subscribe_full(
            msg_id,
            pipe_id,
            Qos::default(),
            self.config.default_msg_limit,
            SubscriptionScope::Global,
        )
    }

    /// Subscribe with explicit QoS and per-destination message limit.
    pub fn subscribe_ex(
        &self,
        msg_id: MsgId,
        pipe_id: PipeId,
        qos: Qos,
        msg_limit: u16,
    ) -> Result<()> {
        self.subscribe_full(msg_id, pipe_id, qos, msg_limit, SubscriptionScope::Global)
    }

    /// Loopback-only subscription: never broadcast in subscription reports.
    pub fn subscribe_local(&self, msg_id: MsgId, pipe_id: PipeId, msg_limit: u16) -> Result<()> {
        self.subscribe_full(
            msg_id,
            pipe_id,
            Qos::default(),
            msg_limit,
            SubscriptionScope::Local,
        )
    }

    fn subscribe_full(
        &self,
        msg_id: MsgId,
        pipe_id: PipeId,
        qos: Qos,
        msg_limit: u16,
        scope: SubscriptionScope,
    ) -> Result<()> {
        if !self.config.msg_id_valid(msg_id) {
            return Err(self.bad_argument(format!("subscribe: {} out of range", msg_id)));
        }
        if msg_limit == 0 {
            return Err(self.bad_argument(format!("subscribe {}: zero message limit", msg_id)));
        }
        let caller = self.tasks.current_task();

        let outcome = {
            let mut shared = self.shared.lock();
            let pipe = shared
                .pipes
                .get(pipe_id)
                .ok_or_else(|| Error::BadArgument(format!("unknown {}", pipe_id)))?;
            if pipe.owner != caller {
                return Err(Error::BadArgument(format!(
                    "{} not owned by caller {}",
                    pipe_id, caller
                )));
            }
            shared
                .routes
                .subscribe(RouteKey::from_msg_id(msg_id), pipe_id, qos, msg_limit, scope)?
        };

        match outcome {
            SubscribeOutcome::Added => self.events.report(
                events::EVT_SUBSCRIPTION_RCVD,
                Severity::Debug,
                &format!("{} subscribed to {}", pipe_id, msg_id),
            ),
            SubscribeOutcome::Updated => self.events.report(
                events::EVT_DUP_SUBSCRIPTION,
                Severity::Debug,
                &format!("duplicate subscription of {} to {}", pipe_id, msg_id),
            ),
        }

        if scope == SubscriptionScope::Global && self.subscription_reporting() {
            self.send_subscription_report(msg_id, pipe_id, qos, true);
        }
        Ok(())
    }

    /// Remove the (msg_id, pipe) subscription. A missing subscription is
    /// a notice, not an error.
    pub fn unsubscribe(&self, msg_id: MsgId, pipe_id: PipeId) -> Result<()> {
        self.unsubscribe_scoped(msg_id, pipe_id, SubscriptionScope::Global)
    }

    /// Local-scope unsubscribe (no subscription report).
    pub fn unsubscribe_local(&self, msg_id: MsgId, pipe_id: PipeId) -> Result<()> {
        self.unsubscribe_scoped(msg_id, pipe_id, SubscriptionScope::Local)
    }

    fn unsubscribe_scoped(
        &self,
        msg_id: MsgId,
        pipe_id: PipeId,
        scope: SubscriptionScope,
    ) -> Result<()> {
        if !self.config.msg_id_valid(msg_id) {
            return Err(self.bad_argument(format!("unsubscribe: {} out of range", msg_id)));
        }
        let caller = self.tasks.current_task();

        let outcome = {
            let mut shared = self.shared.lock();
            let pipe = shared
                .pipes
                .get(pipe_id)
                .ok_or_else(|| Error::BadArgument(format!("unknown {}", pipe_id)))?;
            if pipe.owner != caller {
                return Err(Error::BadArgument(format!(
                    "{} not owned by caller {}",
                    pipe_id, caller
                )));
            }
            shared.routes.unsubscribe(RouteKey::from_msg_id(msg_id), pipe_id)
        };

        match outcome {
            UnsubscribeOutcome::Removed => {
                self.events.report(
                    events::EVT_SUBSCRIPTION_REMOVED,
                    Severity::Debug,
                    &format!("{} unsubscribed from {}", pipe_id, msg_id),
                );
                if scope == SubscriptionScope::Global && self.subscription_reporting() {
                    self.send_subscription_report(msg_id, pipe_id, Qos::default(), false);
                }
            }
            UnsubscribeOutcome::NoRoute | UnsubscribeOutcome::NoMatch => {
                self.events.report(
                    events::EVT_UNSUB_NO_MATCH,
                    Severity::Info,
                    &format!("no subscription of {} to {}", pipe_id, msg_id),
                );
            }
        }
        Ok(())
    }

    /// Administratively enable or disable a whole route.
    pub fn set_route_enabled(&self, msg_id: MsgId, enabled: bool) -> Result<()> {
        let mut shared = self.shared.lock();
        let ridx = shared
            .routes
            .lookup(RouteKey::from_msg_id(msg_id))
            .ok_or_else(|| Error::BadArgument(format!("no route for {}", msg_id)))?;
        shared.routes.route_mut(ridx).enabled = enabled;
        Ok(())
    }

    /// Administratively enable or disable one (msg_id, pipe) destination
    /// without unsubscribing it.
    pub fn set_subscription_active(
        &self,
        msg_id: MsgId,
        pipe_id: PipeId,
        active: bool,
    ) -> Result<()> {
        let mut shared = self.shared.lock();
        let didx = shared
            .routes
            .find_dest(RouteKey::from_msg_id(msg_id), pipe_id)
            .ok_or_else(|| {
                Error::BadArgument(format!("no subscription of {} to {}", pipe_id, msg_id))
            })?;
        shared.routes.dest_mut(didx).active = active;
        Ok(())
    }

    /// Toggle broadcast of subscribe/unsubscribe reports.
    pub fn set_subscription_reporting(&self, enabled: bool) {
        self.sub_reporting.store(enabled, Ordering::Relaxed);
    }

    pub fn subscription_reporting(&self) -> bool {
        self.sub_reporting.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Send / Receive
    // ------------------------------------------------------------------

    /// Publish a message, incrementing the route's telemetry sequence
    /// count.
    pub fn send(&self, msg: &[u8]) -> Result<()> {
        self.send_ex(msg, true)
    }

    /// Publish with explicit control of sequence-count stamping.
    pub fn send_ex(&self, msg: &[u8], increment_sequence: bool) -> Result<()> {
        if msg.is_empty() {
            return Err(self.bad_argument("send: empty message buffer".into()));
        }
        let size = self.codec.size(msg).map_err(|e| self.mirror_bad_arg(e))?;
        if size > self.config.max_msg_size || size > msg.len() {
            BusMetrics::bump(&self.metrics.msg_too_big_errors);
            let err = Error::MessageTooBig {
                size,
                max: self.config.max_msg_size.min(msg.len()),
            };
            self.events
                .report(events::EVT_MSG_TOO_BIG, Severity::Error, &err.to_string());
            return Err(err);
        }
        let msg_id = self.codec.msg_id(msg).map_err(|e| self.mirror_bad_arg(e))?;
        if !self.config.msg_id_valid(msg_id) {
            return Err(self.bad_argument(format!("send: {} out of range", msg_id)));
        }

        let handle = match self.pool.allocate(size) {
            Ok(h) => h,
            Err(e) => {
                BusMetrics::bump(&self.metrics.alloc_failures);
                self.events.report(
                    events::EVT_ALLOC_FAILURE,
                    Severity::Error,
                    &format!("send of {}: {}", msg_id, e),
                );
                return Err(e);
            }
        };
        // Sole holder here; the copy cannot fail a size check.
        self.pool.copy_in(handle, &msg[..size])?;

        let sender = self.tasks.current_task();
        self.route_delivery(handle, size, msg_id, sender, increment_sequence)
    }

    /// Fan out one pool buffer to every eligible destination of its route.
    ///
    /// Consumes the caller's reference: on return the buffer's use-count
    /// equals the number of queued deliveries (zero frees it).
    pub(crate) fn route_delivery(
        &self,
        handle: BufHandle,
        size: usize,
        msg_id: MsgId,
        sender: TaskId,
        increment_sequence: bool,
    ) -> Result<()> {
        let key = RouteKey::from_msg_id(msg_id);
        let mut notices: Vec<(u16, Severity, String)> = Vec::new();

        let mut shared = self.shared.lock();
        let state = &mut *shared;

        let routed = match state.routes.lookup(key) {
            None => None,
            Some(ridx) if !state.routes.route(ridx).enabled => {
                log::debug!("[BUS] route for {} disabled, dropping send", msg_id);
                None
            }
            Some(ridx) => Some(ridx),
        };

        let Some(ridx) = routed else {
            drop(shared);
            BusMetrics::bump(&self.metrics.no_subscribers);
            self.events.report(
                events::EVT_NO_SUBSCRIBERS,
                Severity::Info,
                &format!("no subscribers for {}", msg_id),
            );
            let _ = self.pool.release(handle);
            BusMetrics::bump(&self.metrics.msgs_sent);
            return Ok(());
        };

        // One sequence-count increment per successful send call, stamped
        // into the shared buffer before any destination can observe it.
        if increment_sequence
            && matches!(self.codec.msg_type_from_id(msg_id), Ok(MsgType::Telemetry))
        {
            let route = state.routes.route_mut(ridx);
            route.seq_count = route.seq_count.wrapping_add(1) & 0x3FFF;
            let seq = route.seq_count;
            if let Ok(mut data) = self.pool.data_mut(handle) {
                let _ = self.codec.set_sequence_count(&mut data, seq);
            }
        }

        // Phase 1: pick eligible destinations. Duplicate subscriptions of
        // one pipe must not duplicate delivery.
        let mut chosen: Vec<(crate::route::DestIdx, Arc<Pipe>)> = Vec::new();
        let mut seen: Vec<PipeId> = Vec::new();
        for (didx, dest) in state.routes.destinations(ridx) {
            if !dest.active || seen.contains(&dest.pipe) {
                continue;
            }
            seen.push(dest.pipe);
            let Some(pipe) = state.pipes.get(dest.pipe) else {
                continue;
            };
            if pipe.opts.lock().ignore_mine && pipe.owner == sender {
                continue;
            }
            if dest.in_flight >= dest.msg_limit {
                BusMetrics::bump(&self.metrics.msg_limit_errors);
                notices.push((
                    events::EVT_MSG_LIMIT_EXCEEDED,
                    Severity::Error,
                    format!(
                        "msg limit {} exceeded for {} on {} '{}'",
                        dest.msg_limit, msg_id, dest.pipe, pipe.name
                    ),
                ));
                continue;
            }
            chosen.push((didx, pipe));
        }

        // Phase 2: enqueue one reference per destination. A full queue
        // drops that destination only.
        for (didx, pipe) in chosen {
            self.pool.retain(handle)?;
            match pipe.push(Delivery {
                handle,
                msg_id,
                size,
            }) {
                Ok(()) => {
                    state.routes.dest_mut(didx).in_flight += 1;
                    BusMetrics::bump(&self.metrics.deliveries);
                }
                Err(_) => {
                    let _ = self.pool.release(handle);
                    BusMetrics::bump(&self.metrics.pipe_overflow_errors);
                    notices.push((
                        events::EVT_PIPE_OVERFLOW,
                        Severity::Error,
                        format!("{} '{}' full, dropping {}", pipe.id, pipe.name, msg_id),
                    ));
                }
            }
        }
        drop(shared);

        // Sender's own reference: the buffer now lives exactly as long as
        // its queued deliveries.
        let _ = self.pool.release(handle);
        BusMetrics::bump(&self.metrics.msgs_sent);

        for (id, sev, text) in notices {
            self.events.report(id, sev, &text);
        }
        Ok(())
    }

    /// Receive the oldest delivery on an owned pipe.
    ///
    /// `Poll` returns `NoMessage` immediately when empty; a millisecond
    /// timeout returns `TimeOut` on expiry; `Forever` blocks. The returned
    /// [`Message`] releases its buffer reference on drop.
    pub fn receive(self: &Arc<Self>, pipe_id: PipeId, timeout: ReceiveTimeout) -> Result<Message> {
        let pipe = {
            let shared = self.shared.lock();
            shared
                .pipes
                .get(pipe_id)
                .ok_or_else(|| Error::BadArgument(format!("unknown {}", pipe_id)))?
        };
        let delivery = pipe.recv(timeout)?;

        // The message is out of the queue: drop it from the destination's
        // in-flight accounting.
        {
            let mut shared = self.shared.lock();
            if let Some(didx) = shared
                .routes
                .find_dest(RouteKey::from_msg_id(delivery.msg_id), pipe_id)
            {
                let dest = shared.routes.dest_mut(didx);
                dest.in_flight = dest.in_flight.saturating_sub(1);
            }
        }
        BusMetrics::bump(&self.metrics.msgs_received);

        Ok(Message {
            bus: Arc::clone(self),
            handle: delivery.handle,
            msg_id: delivery.msg_id,
            size: delivery.size,
        })
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn bad_argument(&self, text: String) -> Error {
        BusMetrics::bump(&self.metrics.bad_arg_errors);
        self.events
            .report(events::EVT_BAD_ARGUMENT, Severity::Error, &text);
        Error::BadArgument(text)
    }

    fn mirror_bad_arg(&self, err: Error) -> Error {
        BusMetrics::bump(&self.metrics.bad_arg_errors);
        self.events
            .report(events::EVT_BAD_ARGUMENT, Severity::Error, &err.to_string());
        err
    }

    /// Broadcast one subscribe/unsubscribe report on the configured id.
    fn send_subscription_report(&self, msg_id: MsgId, pipe_id: PipeId, qos: Qos, added: bool) {
        let mut buf = [0u8; 20];
        let total = 20;
        let report_ok = self
            .codec
            .init_message(&mut buf, self.config.sub_report_msg_id, total)
            .is_ok();
        if !report_ok {
            return;
        }
        // Payload: op, pipe, qos, subject id.
        buf[12] = u8::from(added);
        buf[13] = pipe_id.raw();
        buf[14] = qos.priority;
        buf[15] = qos.reliability;
        buf[16..20].copy_from_slice(&msg_id.value().to_be_bytes());
        // Reporting must never fail the subscription that triggered it.
        if let Err(e) = self.send_ex(&buf, false) {
            log::debug!("[BUS] subscription report for {} dropped: {}", msg_id, e);
        }
    }

    /// Run `f` under the engine lock (admin snapshots).
    pub(crate) fn with_shared<R>(&self, f: impl FnOnce(&Shared) -> R) -> R {
        let shared = self.shared.lock();
        f(&shared)
    }

    pub(crate) fn register_pending_zc(&self, task: TaskId, handle: BufHandle) {
        self.shared.lock().pending_zc.push((task, handle));
    }

    pub(crate) fn unregister_pending_zc(&self, handle: BufHandle) {
        self.shared.lock().pending_zc.retain(|&(_, h)| h != handle);
    }
}

/// A received message: a reference-counted view into the buffer pool.
///
/// Dropping the message releases its reference; the underlying block
/// returns to the pool when the last receiver drops.
pub struct Message {
    bus: Arc<SoftwareBus>,
    handle: BufHandle,
    msg_id: MsgId,
    size: usize,
}

impl Message {
    pub fn msg_id(&self) -> MsgId {
        self.msg_id
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Borrow the message bytes. Holds the pool lock; keep it short.
    pub fn bytes(&self) -> Result<MappedMutexGuard<'_, [u8]>> {
        self.bus.pool.data(self.handle)
    }

    /// Copy the message bytes out.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(self.bytes()?.to_vec())
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        let _ = self.bus.pool.release(self.handle);
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("msg_id", &self.msg_id)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> Arc<SoftwareBus> {
        SoftwareBus::with_defaults(BusConfig::default())
    }

    #[test]
    fn test_send_rejects_short_buffer() {
        let bus = bus();
        assert!(matches!(bus.send(&[0u8; 3]), Err(Error::BadArgument(_))));
        assert_eq!(bus.metrics_snapshot().bad_arg_errors, 1);
    }

    #[test]
    fn test_send_rejects_length_beyond_slice() {
        let bus = bus();
        let mut msg = vec![0u8; 16];
        bus.codec
            .init_message(&mut msg, MsgId::new(0x0801), 16)
            .expect("init header");
        // Header claims 64 bytes but only 16 were handed in.
        bus.codec.set_size(&mut msg, 64).expect("inflate length");
        assert!(matches!(
            bus.send(&msg),
            Err(Error::MessageTooBig { size: 64, .. })
        ));
        assert_eq!(bus.pool_stats().blocks_in_use, 0);
    }

    #[test]
    fn test_subscribe_rejects_out_of_range_id() {
        let bus = bus();
        let pipe = bus.create_pipe(4, "RANGE_PIPE").expect("create pipe");
        assert!(bus.subscribe(MsgId::new(0xF000_0000), pipe).is_err());
        assert!(bus.subscribe_ex(MsgId::new(0x0801), pipe, Qos::default(), 0).is_err());
    }

    #[test]
    fn test_set_subscription_active_gates_delivery() {
        let bus = bus();
        let pipe = bus.create_pipe(4, "GATE_PIPE").expect("create pipe");
        let id = MsgId::new(0x0801);
        bus.subscribe(id, pipe).expect("subscribe");

        let mut msg = vec![0u8; 16];
        bus.codec.init_message(&mut msg, id, 16).expect("init header");

        bus.set_subscription_active(id, pipe, false).expect("deactivate");
        bus.send(&msg).expect("send while inactive");
        assert!(matches!(
            bus.receive(pipe, ReceiveTimeout::Poll),
            Err(Error::NoMessage)
        ));

        bus.set_subscription_active(id, pipe, true).expect("reactivate");
        bus.send(&msg).expect("send while active");
        assert!(bus.receive(pipe, ReceiveTimeout::Poll).is_ok());
    }
}
