// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Zero-copy send path: build a message directly in a pool buffer and
//! hand the same block to every subscriber without an intermediate copy.

use crate::error::{Error, Result};
use crate::engine::SoftwareBus;
use crate::pool::BufHandle;

use parking_lot::MappedMutexGuard;
use std::sync::Arc;

/// A pool buffer leased to the caller for in-place message construction.
///
/// Obtained from [`SoftwareBus::zero_copy_get`]. The buffer stays tracked
/// against the owning task until it is sent or dropped, so a task that
/// dies mid-build never leaks the block.
pub struct ZeroCopyBuffer {
    bus: Arc<SoftwareBus>,
    handle: BufHandle,
    size: usize,
    armed: bool,
}

impl SoftwareBus {
    /// Lease a pool buffer of `size` bytes for zero-copy construction.
    pub fn zero_copy_get(self: &Arc<Self>, size: usize) -> Result<ZeroCopyBuffer> {
        if size == 0 || size > self.config.max_msg_size {
            return Err(Error::BadArgument(format!(
                "zero-copy size {} outside 1..={}",
                size, self.config.max_msg_size
            )));
        }
        let handle = self.pool.allocate(size)?;
        let owner = self.tasks.current_task();
        self.register_pending_zc(owner, handle);
        Ok(ZeroCopyBuffer {
            bus: Arc::clone(self),
            handle,
            size,
            armed: true,
        })
    }
}

impl ZeroCopyBuffer {
    /// Usable length of the leased buffer.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Writable view of the buffer. Holds the pool lock; keep it short.
    pub fn bytes_mut(&mut self) -> Result<MappedMutexGuard<'_, [u8]>> {
        self.bus.pool.data_mut(self.handle)
    }

    /// Publish the buffer, stamping the route sequence count.
    ///
    /// The header must already be initialized (see
    /// [`MsgCodec::init_message`](crate::msg::MsgCodec::init_message)).
    /// Consumes the lease either way; on error the buffer is returned to
    /// the pool.
    pub fn send(self) -> Result<()> {
        self.finish(true)
    }

    /// Publish the buffer unmodified: no sequence-count stamp. Used when
    /// forwarding a message that another component already stamped.
    pub fn pass(self) -> Result<()> {
        self.finish(false)
    }

    fn finish(mut self, increment_sequence: bool) -> Result<()> {
        self.armed = false;
        self.bus.unregister_pending_zc(self.handle);

        let checked = self.validate();
        let (msg_id, size) = match checked {
            Ok(v) => v,
            Err(e) => {
                let _ = self.bus.pool.release(self.handle);
                return Err(e);
            }
        };
        let sender = self.bus.tasks.current_task();
        self.bus
            .route_delivery(self.handle, size, msg_id, sender, increment_sequence)
    }

    fn validate(&self) -> Result<(crate::msg::MsgId, usize)> {
        let data = self.bus.pool.data(self.handle)?;
        let size = self.bus.codec.size(&data)?;
        if size > self.size {
            return Err(Error::MessageTooBig {
                size,
                max: self.size,
            });
        }
        let msg_id = self.bus.codec.msg_id(&data)?;
        drop(data);
        if !self.bus.config.msg_id_valid(msg_id) {
            return Err(Error::BadArgument(format!(
                "zero-copy send: {} out of range",
                msg_id
            )));
        }
        Ok((msg_id, size))
    }

    /// Return the buffer to the pool without sending.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.armed {
            self.armed = false;
            self.bus.unregister_pending_zc(self.handle);
            let _ = self.bus.pool.release(self.handle);
        }
    }
}

impl Drop for ZeroCopyBuffer {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for ZeroCopyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroCopyBuffer")
            .field("size", &self.size)
            .field("armed", &self.armed)
            .finish()
    }
}
