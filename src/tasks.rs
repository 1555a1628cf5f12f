// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Task-registry collaborator.
//!
//! The bus does not manage task lifecycle; it only needs to know who is
//! calling (pipe ownership checks) and how to name a task in diagnostic
//! text. Hosts supply a [`TaskRegistry`]; [`LocalTaskRegistry`] is a
//! thread-keyed implementation for in-process hosts and tests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::ThreadId;

/// Task identifier assigned by the host's executive layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u32);

impl TaskId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task{}", self.0)
    }
}

/// Executive-services seam: caller identity and diagnostic naming.
///
/// Implementations must be `Send + Sync`; the bus calls them from any
/// caller task, never holding its own locks across the call.
pub trait TaskRegistry: Send + Sync {
    /// Identity of the calling task.
    fn current_task(&self) -> TaskId;

    /// Human-readable task name for events and reports.
    fn task_name(&self, task: TaskId) -> String;
}

/// Thread-keyed registry: each OS thread becomes its own task on first
/// contact, optionally named via [`LocalTaskRegistry::register_current`].
#[derive(Default)]
pub struct LocalTaskRegistry {
    next_id: AtomicU32,
    by_thread: Mutex<HashMap<ThreadId, TaskId>>,
    names: Mutex<HashMap<TaskId, String>>,
}

impl LocalTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the calling thread's task.
    pub fn register_current(&self, name: &str) -> TaskId {
        let task = self.current_task();
        self.names.lock().insert(task, name.to_owned());
        task
    }
}

impl TaskRegistry for LocalTaskRegistry {
    fn current_task(&self) -> TaskId {
        let thread = std::thread::current().id();
        let mut map = self.by_thread.lock();
        *map.entry(thread)
            .or_insert_with(|| TaskId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn task_name(&self, task: TaskId) -> String {
        self.names
            .lock()
            .get(&task)
            .cloned()
            .unwrap_or_else(|| task.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_same_thread_same_task() {
        let reg = LocalTaskRegistry::new();
        assert_eq!(reg.current_task(), reg.current_task());
    }

    #[test]
    fn test_threads_get_distinct_tasks() {
        let reg = Arc::new(LocalTaskRegistry::new());
        let here = reg.current_task();
        let reg2 = Arc::clone(&reg);
        let there = std::thread::spawn(move || reg2.current_task())
            .join()
            .expect("spawned thread");
        assert_ne!(here, there);
    }

    #[test]
    fn test_naming() {
        let reg = LocalTaskRegistry::new();
        let task = reg.register_current("CMD_APP");
        assert_eq!(reg.task_name(task), "CMD_APP");
        // Unnamed tasks fall back to the id.
        assert_eq!(reg.task_name(TaskId(99)), "task99");
    }
}
