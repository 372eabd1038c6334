//! In-process exclusion for engine operations
//!
//! Lock order is always: graph lock, then inbox lock, then task locks in
//! ascending `TaskId` order. Structural operations take the graph lock for
//! writing; everything else takes it for reading, so lifecycle operations on
//! different tasks run in parallel while never interleaving with a rewire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::domain::TaskId;

#[derive(Debug, Default)]
pub struct GraphLocks {
    graph: RwLock<()>,
    inbox: Mutex<()>,
    tasks: Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
}

impl GraphLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the whole graph
    pub fn with_graph_write<R>(&self, f: impl FnOnce() -> R) -> R {
        let _graph = self.graph.write().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Runs `f` with exclusive access to the whole graph and the inbox count
    pub fn with_graph_write_and_inbox<R>(&self, f: impl FnOnce() -> R) -> R {
        let _graph = self.graph.write().unwrap_or_else(PoisonError::into_inner);
        let _inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Runs `f` holding the inbox lock, so count-then-insert is atomic
    pub fn with_inbox<R>(&self, f: impl FnOnce() -> R) -> R {
        let _graph = self.graph.read().unwrap_or_else(PoisonError::into_inner);
        let _inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Runs `f` holding the per-task locks of `ids`
    pub fn with_tasks<R>(&self, ids: &[&TaskId], f: impl FnOnce() -> R) -> R {
        let _graph = self.graph.read().unwrap_or_else(PoisonError::into_inner);

        let handles = self.handles(ids);
        let guards: Vec<_> = handles
            .iter()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();

        let result = f();

        drop(guards);
        drop(handles);
        self.prune();
        result
    }

    fn handles(&self, ids: &[&TaskId]) -> Vec<Arc<Mutex<()>>> {
        let mut sorted: Vec<&TaskId> = ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut table = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        sorted
            .into_iter()
            .map(|id| Arc::clone(table.entry(id.clone()).or_default()))
            .collect()
    }

    /// Drops table entries nobody is holding
    fn prune(&self) {
        let mut table = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
