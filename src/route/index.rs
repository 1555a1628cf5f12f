// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LIFO free-index stack for route-table slots.
//!
//! Preloaded with `0..capacity` at initialization so the route table never
//! needs compaction: a torn-down route pushes its index back and the next
//! subscription pops it again. Callers must never push an index that is
//! still in use.

/// Stack of free route indices.
#[derive(Debug)]
pub(crate) struct IndexStack {
    free: Vec<u16>,
    capacity: usize,
}

impl IndexStack {
    /// Preload with `0..capacity`, lowest index on top.
    ///
    /// Indices are `u16`; a capacity beyond that range would silently
    /// truncate, so it is rejected in release builds too.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(
            capacity <= usize::from(u16::MAX) + 1,
            "index stack capacity {} exceeds the u16 index range",
            capacity
        );
        Self {
            free: (0..capacity as u16).rev().collect(),
            capacity,
        }
    }

    /// Pop a free index; `None` when every slot is in use.
    pub(crate) fn pop(&mut self) -> Option<u16> {
        self.free.pop()
    }

    /// Return a reclaimed index. The index must have come from `pop` and
    /// must no longer be referenced anywhere.
    pub(crate) fn push(&mut self, idx: u16) {
        debug_assert!(usize::from(idx) < self.capacity, "index out of range");
        debug_assert!(!self.free.contains(&idx), "double free of route index");
        self.free.push(idx);
    }

    /// Number of indices currently handed out.
    pub(crate) fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_pop_yields_distinct_indices_then_empty() {
        let mut stack = IndexStack::new(8);
        let mut seen = HashSet::new();
        for _ in 0..8 {
            let idx = stack.pop().expect("preloaded stack has indices");
            assert!(usize::from(idx) < 8);
            assert!(seen.insert(idx), "index {} handed out twice", idx);
        }
        assert!(stack.pop().is_none(), "empty stack must report exhaustion");
        assert_eq!(stack.in_use(), 8);
    }

    #[test]
    fn test_push_pop_symmetry_is_lifo() {
        let mut stack = IndexStack::new(4);
        let mut popped = Vec::new();
        for _ in 0..4 {
            popped.push(stack.pop().expect("preloaded"));
        }
        for &idx in &popped {
            stack.push(idx);
        }
        // LIFO: indices come back in the exact reverse order pushed.
        for &idx in popped.iter().rev() {
            assert_eq!(stack.pop(), Some(idx));
        }
    }

    #[test]
    #[should_panic(expected = "exceeds the u16 index range")]
    fn test_rejects_capacity_beyond_index_range() {
        let _ = IndexStack::new(usize::from(u16::MAX) + 2);
    }

    #[test]
    fn test_full_cycle_restores_capacity() {
        let mut stack = IndexStack::new(16);
        let all: Vec<u16> = std::iter::from_fn(|| stack.pop()).collect();
        assert_eq!(all.len(), 16);
        for idx in all {
            stack.push(idx);
        }
        assert_eq!(stack.in_use(), 0);
        let again: Vec<u16> = std::iter::from_fn(|| stack.pop()).collect();
        assert_eq!(again.len(), 16);
    }
}
