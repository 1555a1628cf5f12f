// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipes: per-task bounded delivery queues.
//!
//! Each pipe pairs a lock-free bounded queue with a condvar-backed wake
//! protocol (atomic-ish fast path, sleep only when idle): enqueue never
//! blocks the sender (a full queue is the sender's problem to report, not
//! to wait on), dequeue blocks the owning task per the receive timeout.
//!
//! Pipe queues synchronize independently of the engine's shared-state
//! lock, so a task blocked in `receive` never holds up routing mutation.

use crate::error::{Error, Result};
use crate::msg::MsgId;
use crate::pool::BufHandle;
use crate::tasks::TaskId;
use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipe identifier: an index into the pipe table, unique while the pipe is
/// alive and reusable after delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(u8);

impl PipeId {
    /// Wrap a raw pipe index (admin command payloads carry these).
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw pipe index.
    pub fn raw(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for PipeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipe{}", self.0)
    }
}

/// Per-pipe configurable options, owner-settable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeOptions {
    /// Drop deliveries whose sender task is the pipe's own owner.
    pub ignore_mine: bool,
}

/// Receive timeout semantics. The only valid negative raw value is the
/// wait-forever sentinel (`-1`); zero polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveTimeout {
    /// Non-blocking: `NoMessage` immediately when empty.
    Poll,
    /// Block up to this many milliseconds, then `TimeOut`.
    Millis(u32),
    /// Block until a message arrives.
    Forever,
}

impl TryFrom<i32> for ReceiveTimeout {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Poll),
            -1 => Ok(Self::Forever),
            ms if ms > 0 => Ok(Self::Millis(ms as u32)),
            other => Err(Error::BadArgument(format!(
                "invalid receive timeout {}",
                other
            ))),
        }
    }
}

/// One buffer reference awaiting receive on a pipe.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Delivery {
    pub handle: BufHandle,
    pub msg_id: MsgId,
    pub size: usize,
}

/// A bounded FIFO of buffer references owned by one task.
pub(crate) struct Pipe {
    pub id: PipeId,
    pub name: String,
    pub owner: TaskId,
    pub depth: usize,
    pub opts: Mutex<PipeOptions>,
    queue: ArrayQueue<Delivery>,
    closed: AtomicBool,
    /// Wake protocol (sleep flag + condvar); the queue itself is lock-free.
    sleeping: Mutex<bool>,
    wake: Condvar,
}

impl Pipe {
    fn new(id: PipeId, name: String, owner: TaskId, depth: usize) -> Self {
        Self {
            id,
            name,
            owner,
            depth,
            opts: Mutex::new(PipeOptions::default()),
            queue: ArrayQueue::new(depth),
            closed: AtomicBool::new(false),
            sleeping: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// Current queue occupancy.
    pub(crate) fn occupancy(&self) -> usize {
        self.queue.len()
    }

    /// Enqueue a delivery without blocking. `PipeFull` when at depth.
    pub(crate) fn push(&self, delivery: Delivery) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PipeDeleted);
        }
        self.queue.push(delivery).map_err(|_| Error::PipeFull)?;
        self.notify();
        Ok(())
    }

    /// Dequeue the oldest delivery per the timeout semantics.
    pub(crate) fn recv(&self, timeout: ReceiveTimeout) -> Result<Delivery> {
        match timeout {
            ReceiveTimeout::Poll => {
                if let Some(d) = self.queue.pop() {
                    return Ok(d);
                }
                if self.closed.load(Ordering::Acquire) {
                    return Err(Error::PipeDeleted);
                }
                Err(Error::NoMessage)
            }
            ReceiveTimeout::Millis(ms) => {
                self.recv_blocking(Some(Instant::now() + Duration::from_millis(u64::from(ms))))
            }
            ReceiveTimeout::Forever => self.recv_blocking(None),
        }
    }

    fn recv_blocking(&self, deadline: Option<Instant>) -> Result<Delivery> {
        loop {
            if let Some(d) = self.queue.pop() {
                return Ok(d);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::PipeDeleted);
            }

            let mut sleeping = self.sleeping.lock();
            // Double-check under the lock: a sender may have pushed between
            // the failed pop and here, before it could observe `sleeping`.
            if let Some(d) = self.queue.pop() {
                return Ok(d);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::PipeDeleted);
            }
            *sleeping = true;
            match deadline {
                None => {
                    self.wake.wait(&mut sleeping);
                    *sleeping = false;
                }
                Some(dl) => {
                    let timed_out = self.wake.wait_until(&mut sleeping, dl).timed_out();
                    *sleeping = false;
                    if timed_out {
                        drop(sleeping);
                        // A push may have raced the timeout.
                        return self.queue.pop().ok_or(Error::TimeOut);
                    }
                }
            }
        }
    }

    /// Mark deleted and wake any blocked receiver.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _sleeping = self.sleeping.lock();
        self.wake.notify_all();
    }

    /// Drain every queued delivery (delete-pipe path).
    pub(crate) fn drain(&self) -> Vec<Delivery> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    fn notify(&self) {
        // Only take the lock when a receiver might be sleeping; the check
        // is racy but the receiver's double-check under the lock closes
        // the lost-wakeup window.
        if *self.sleeping.lock() {
            self.wake.notify_all();
        }
    }
}

/// Registry of live pipes; slot index doubles as the pipe id.
pub(crate) struct PipeTable {
    slots: Vec<Option<Arc<Pipe>>>,
    by_name: std::collections::HashMap<String, PipeId>,
}

impl PipeTable {
    /// Slot indices are `u8`; a ceiling beyond that range would silently
    /// truncate, so it is rejected in release builds too.
    pub(crate) fn new(max_pipes: usize) -> Self {
        assert!(
            max_pipes <= usize::from(u8::MAX) + 1,
            "pipe table ceiling {} exceeds the u8 slot range",
            max_pipes
        );
        let mut slots = Vec::with_capacity(max_pipes);
        slots.resize_with(max_pipes, || None);
        Self {
            slots,
            by_name: std::collections::HashMap::new(),
        }
    }

    /// Create a pipe in the first free slot.
    pub(crate) fn create(
        &mut self,
        depth: usize,
        max_depth: usize,
        name: &str,
        owner: TaskId,
    ) -> Result<Arc<Pipe>> {
        if depth == 0 || depth > max_depth {
            return Err(Error::BadArgument(format!(
                "pipe depth {} outside 1..={}",
                depth, max_depth
            )));
        }
        if name.is_empty() {
            return Err(Error::BadArgument("pipe name is empty".into()));
        }
        if self.by_name.contains_key(name) {
            return Err(Error::BadArgument(format!(
                "pipe name '{}' already in use",
                name
            )));
        }
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::MaxPipesMet)?;
        let id = PipeId(slot as u8);
        let pipe = Arc::new(Pipe::new(id, name.to_owned(), owner, depth));
        self.slots[slot] = Some(Arc::clone(&pipe));
        self.by_name.insert(name.to_owned(), id);
        Ok(pipe)
    }

    pub(crate) fn get(&self, id: PipeId) -> Option<Arc<Pipe>> {
        self.slots.get(usize::from(id.0))?.as_ref().map(Arc::clone)
    }

    /// Remove the pipe, freeing its slot and name for reuse.
    pub(crate) fn remove(&mut self, id: PipeId) -> Result<Arc<Pipe>> {
        let slot = self
            .slots
            .get_mut(usize::from(id.0))
            .ok_or_else(|| Error::BadArgument(format!("unknown {}", id)))?;
        let pipe = slot
            .take()
            .ok_or_else(|| Error::BadArgument(format!("unknown {}", id)))?;
        self.by_name.remove(&pipe.name);
        Ok(pipe)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Pipe>> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub(crate) fn owned_by(&self, task: TaskId) -> Vec<PipeId> {
        self.iter()
            .filter(|p| p.owner == task)
            .map(|p| p.id)
            .collect()
    }

    pub(crate) fn pipes_in_use(&self) -> usize {
        self.iter().count()
    }
}
