// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted buffer pool over size-classed free lists.
//!
//! A fixed-capacity arena divided into size classes; `allocate` walks the
//! class table best-fit-first and falls back to larger classes when one is
//! exhausted. Blocks carry an embedded use-count and a guard word so stale
//! or forged handles are rejected before they can be dereferenced.
//!
//! Allocation never blocks or retries: an exhausted pool returns
//! `BufAllocationError` and callers shed load.

use crate::error::{Error, Result};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

/// Guard seed XORed with the handle bits; a mismatch means the handle is
/// stale (block already freed) or was never issued by this pool.
const GUARD_SEED: u32 = 0x5B5B_0B05;

/// Handle to an allocated block.
///
/// Encoded as: upper 16 bits = size class, lower 16 bits = slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufHandle(pub(crate) u32);

impl BufHandle {
    fn new(class: u16, slot: u16) -> Self {
        Self((u32::from(class) << 16) | u32::from(slot))
    }

    fn class(self) -> usize {
        (self.0 >> 16) as usize
    }

    fn slot(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    fn guard(self) -> u32 {
        GUARD_SEED ^ self.0
    }
}

/// Pool usage statistics, updated on every allocate/free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub bytes_in_use: usize,
    pub peak_bytes_in_use: usize,
    pub blocks_in_use: usize,
    pub peak_blocks_in_use: usize,
    pub alloc_failures: u64,
}

struct Block {
    data: Box<[u8]>,
    /// Message length stored in the block (<= data.len()).
    len: usize,
    /// Embedded use-count; the block returns to its free list exactly when
    /// this transitions to zero.
    refs: u16,
    /// `handle.guard()` while allocated, zero while free.
    guard: u32,
}

struct SizeClass {
    block_size: usize,
    max_blocks: usize,
    blocks: Vec<Block>,
    free: Vec<u16>,
}

struct PoolInner {
    classes: Vec<SizeClass>,
    stats: PoolStats,
}

impl PoolInner {
    /// Validate a handle down to its block, checking arena bounds and the
    /// guard word.
    fn check(&mut self, handle: BufHandle) -> Result<&mut Block> {
        let class = self
            .classes
            .get_mut(handle.class())
            .ok_or(Error::InvalidHandle)?;
        let block = class
            .blocks
            .get_mut(handle.slot())
            .ok_or(Error::InvalidHandle)?;
        if block.guard != handle.guard() || block.refs == 0 {
            return Err(Error::InvalidHandle);
        }
        Ok(block)
    }
}

/// Size-classed, reference-counted buffer pool.
///
/// All state sits behind a single lock; by convention this lock is always
/// the innermost one acquired by the engine (never held across a call back
/// into routing code).
pub struct BufferPool {
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Build a pool from `(block_size, max_blocks)` size classes. The
    /// table must be sorted by ascending block size.
    pub fn new(classes: &[(usize, usize)]) -> Self {
        debug_assert!(classes.windows(2).all(|w| w[0].0 < w[1].0));
        let classes = classes
            .iter()
            .map(|&(block_size, max_blocks)| SizeClass {
                block_size,
                max_blocks,
                blocks: Vec::new(),
                free: Vec::new(),
            })
            .collect();
        Self {
            inner: Mutex::new(PoolInner {
                classes,
                stats: PoolStats::default(),
            }),
        }
    }

    /// Allocate a block for `size` bytes with use-count 1.
    ///
    /// Selects the smallest class that accommodates `size`, reusing a
    /// freed block when one exists, carving a new one while the class is
    /// under its ceiling, and falling back to larger classes otherwise.
    pub fn allocate(&self, size: usize) -> Result<BufHandle> {
        let mut inner = self.inner.lock();

        let start = match inner.classes.iter().position(|c| c.block_size >= size) {
            Some(idx) => idx,
            None => {
                inner.stats.alloc_failures += 1;
                return Err(Error::BufAllocationError);
            }
        };

        for class_idx in start..inner.classes.len() {
            let class = &mut inner.classes[class_idx];
            let slot = if let Some(slot) = class.free.pop() {
                Some(slot)
            } else if class.blocks.len() < class.max_blocks {
                let slot = class.blocks.len() as u16;
                class.blocks.push(Block {
                    data: vec![0u8; class.block_size].into_boxed_slice(),
                    len: 0,
                    refs: 0,
                    guard: 0,
                });
                Some(slot)
            } else {
                None
            };

            if let Some(slot) = slot {
                let handle = BufHandle::new(class_idx as u16, slot);
                let block_size = class.block_size;
                let block = &mut class.blocks[usize::from(slot)];
                block.len = size;
                block.refs = 1;
                block.guard = handle.guard();

                let stats = &mut inner.stats;
                stats.blocks_in_use += 1;
                stats.bytes_in_use += block_size;
                stats.peak_blocks_in_use = stats.peak_blocks_in_use.max(stats.blocks_in_use);
                stats.peak_bytes_in_use = stats.peak_bytes_in_use.max(stats.bytes_in_use);
                return Ok(handle);
            }
        }

        inner.stats.alloc_failures += 1;
        Err(Error::BufAllocationError)
    }

    /// Increment the use-count (one new holder).
    pub fn retain(&self, handle: BufHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        let block = inner.check(handle)?;
        block.refs += 1;
        Ok(())
    }

    /// Decrement the use-count; returns `true` when this call freed the
    /// block back to its size-class free list.
    pub fn release(&self, handle: BufHandle) -> Result<bool> {
        let mut inner = self.inner.lock();
        let block = inner.check(handle)?;
        block.refs -= 1;
        if block.refs > 0 {
            return Ok(false);
        }
        block.guard = 0;
        block.len = 0;
        let class = &mut inner.classes[handle.class()];
        class.free.push(handle.slot() as u16);
        let block_size = class.block_size;
        inner.stats.blocks_in_use -= 1;
        inner.stats.bytes_in_use -= block_size;
        Ok(true)
    }

    /// Message length stored in the block. Used by the zero-copy
    /// release/validate paths to sanity-check a handle before trusting it.
    pub fn buffer_size(&self, handle: BufHandle) -> Result<usize> {
        let mut inner = self.inner.lock();
        Ok(inner.check(handle)?.len)
    }

    /// Current use-count (introspection and tests).
    pub fn use_count(&self, handle: BufHandle) -> Result<u16> {
        let mut inner = self.inner.lock();
        Ok(inner.check(handle)?.refs)
    }

    /// Read view of the block's message bytes. The pool lock is held for
    /// the guard's lifetime; keep it short.
    pub fn data(&self, handle: BufHandle) -> Result<MappedMutexGuard<'_, [u8]>> {
        let mut inner = self.inner.lock();
        inner.check(handle)?;
        Ok(MutexGuard::map(inner, |i| {
            let block = &mut i.classes[handle.class()].blocks[handle.slot()];
            &mut block.data[..block.len]
        }))
    }

    /// Write view of the block's message bytes. Only legal while the
    /// caller is the sole holder (use-count 1, pre-send fill path).
    pub fn data_mut(&self, handle: BufHandle) -> Result<MappedMutexGuard<'_, [u8]>> {
        let mut inner = self.inner.lock();
        let block = inner.check(handle)?;
        if block.refs != 1 {
            return Err(Error::InvalidHandle);
        }
        Ok(MutexGuard::map(inner, |i| {
            let block = &mut i.classes[handle.class()].blocks[handle.slot()];
            &mut block.data[..block.len]
        }))
    }

    /// Copy `src` into the block (sole-holder fill path).
    pub fn copy_in(&self, handle: BufHandle, src: &[u8]) -> Result<()> {
        let mut dst = self.data_mut(handle)?;
        if src.len() > dst.len() {
            return Err(Error::BadArgument(format!(
                "copy of {} bytes into {}-byte block",
                src.len(),
                dst.len()
            )));
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Snapshot of the usage statistics.
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> BufferPool {
        BufferPool::new(&[(64, 2), (256, 2)])
    }

    #[test]
    fn test_best_fit_class_selection() {
        let pool = small_pool();
        let h = pool.allocate(10).expect("allocation fits first class");
        assert_eq!(h.class(), 0);
        let h = pool.allocate(65).expect("allocation fits second class");
        assert_eq!(h.class(), 1);
    }

    #[test]
    fn test_fallback_to_larger_class() {
        let pool = small_pool();
        let _a = pool.allocate(64).expect("first 64B block");
        let _b = pool.allocate(64).expect("second 64B block");
        // 64B class exhausted; falls back to 256B.
        let c = pool.allocate(64).expect("fallback block");
        assert_eq!(c.class(), 1);
    }

    #[test]
    fn test_exhaustion_fails_without_blocking() {
        let pool = small_pool();
        for _ in 0..4 {
            pool.allocate(64).expect("arena still has room");
        }
        assert!(matches!(
            pool.allocate(64),
            Err(Error::BufAllocationError)
        ));
        assert_eq!(pool.stats().alloc_failures, 1);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let pool = small_pool();
        assert!(matches!(
            pool.allocate(1024),
            Err(Error::BufAllocationError)
        ));
    }

    #[test]
    fn test_refcount_frees_exactly_at_zero() {
        let pool = small_pool();
        let h = pool.allocate(32).expect("alloc");
        pool.retain(h).expect("retain");
        pool.retain(h).expect("retain");
        assert_eq!(pool.use_count(h).expect("count"), 3);

        assert!(!pool.release(h).expect("release 3->2"));
        assert!(!pool.release(h).expect("release 2->1"));
        assert!(pool.release(h).expect("release 1->0 frees"));
        assert_eq!(pool.stats().blocks_in_use, 0);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let pool = small_pool();
        let h = pool.allocate(32).expect("alloc");
        pool.release(h).expect("free");
        assert!(matches!(pool.retain(h), Err(Error::InvalidHandle)));
        assert!(matches!(pool.release(h), Err(Error::InvalidHandle)));
        assert!(matches!(pool.buffer_size(h), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_forged_handle_rejected() {
        let pool = small_pool();
        let _h = pool.allocate(32).expect("alloc");
        assert!(matches!(
            pool.buffer_size(BufHandle(0x00FF_00FF)),
            Err(Error::InvalidHandle)
        ));
    }

    #[test]
    fn test_data_round_trip_and_size() {
        let pool = small_pool();
        let h = pool.allocate(16).expect("alloc");
        pool.copy_in(h, &[7u8; 16]).expect("fill");
        assert_eq!(pool.buffer_size(h).expect("size"), 16);
        let view = pool.data(h).expect("read view");
        assert_eq!(view.len(), 16);
        assert!(view.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_data_mut_requires_sole_holder() {
        let pool = small_pool();
        let h = pool.allocate(16).expect("alloc");
        pool.retain(h).expect("second holder");
        assert!(matches!(pool.data_mut(h), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_stats_track_peaks() {
        let pool = small_pool();
        let a = pool.allocate(64).expect("a");
        let b = pool.allocate(64).expect("b");
        assert_eq!(pool.stats().blocks_in_use, 2);
        assert_eq!(pool.stats().bytes_in_use, 128);
        pool.release(a).expect("free a");
        pool.release(b).expect("free b");
        let stats = pool.stats();
        assert_eq!(stats.blocks_in_use, 0);
        assert_eq!(stats.peak_blocks_in_use, 2);
        assert_eq!(stats.peak_bytes_in_use, 128);
    }

    #[test]
    fn test_slot_reuse_after_free() {
        let pool = small_pool();
        let h = pool.allocate(32).expect("alloc");
        pool.release(h).expect("free");
        let h2 = pool.allocate(32).expect("realloc");
        assert_eq!(h.0, h2.0, "freed slot reused");
        // The old handle value is valid again only because it names the
        // same slot; guard words are handle-derived.
        assert_eq!(pool.use_count(h2).expect("count"), 1);
    }
}
