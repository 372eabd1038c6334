//! Buffered read-validate-write transactions
//!
//! A transaction loads a snapshot, lets the caller mutate a private working
//! copy, and on commit turns the difference into a single versioned
//! [`ChangeSet`]. Dropping a transaction without committing discards every
//! change, which is how failed operations leave the graph untouched.
//!
//! The change set also carries the version of every task that was read but
//! not written. A decision made on a snapshot that another process has since
//! changed is therefore rejected as a conflict, not committed.

use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::{Task, TaskId, TaskMap};
use crate::storage::{ChangeSet, RequestContext, TaskRepository};

use super::error::{EngineError, EngineResult};

pub struct Transaction<'a> {
    repo: &'a dyn TaskRepository,
    ctx: &'a RequestContext,
    op: &'static str,
    original: TaskMap,
    tasks: TaskMap,
    created: BTreeSet<TaskId>,
    whole_store: bool,
}

impl<'a> Transaction<'a> {
    /// Snapshot of every task, for operations that may rewire anything
    pub fn begin_all(
        repo: &'a dyn TaskRepository,
        ctx: &'a RequestContext,
        op: &'static str,
    ) -> EngineResult<Self> {
        let tasks = repo.list_all(ctx).map_err(EngineError::storage(op))?;
        let mut tx = Self::from_tasks(repo, ctx, op, tasks);
        tx.whole_store = true;
        Ok(tx)
    }

    /// Snapshot of the named tasks only
    pub fn begin_with(
        repo: &'a dyn TaskRepository,
        ctx: &'a RequestContext,
        op: &'static str,
        ids: &[&TaskId],
    ) -> EngineResult<Self> {
        let ids: Vec<TaskId> = ids.iter().map(|id| (*id).clone()).collect();
        let tasks = repo.get_by_ids(ctx, &ids).map_err(EngineError::storage(op))?;
        Ok(Self::from_tasks(repo, ctx, op, tasks))
    }

    fn from_tasks(
        repo: &'a dyn TaskRepository,
        ctx: &'a RequestContext,
        op: &'static str,
        tasks: Vec<Task>,
    ) -> Self {
        let original: TaskMap = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self {
            repo,
            ctx,
            op,
            tasks: original.clone(),
            original,
            created: BTreeSet::new(),
            whole_store: false,
        }
    }

    /// Adds more tasks to the snapshot; ones already loaded are kept as is
    pub fn include(&mut self, ids: &[TaskId]) -> EngineResult<()> {
        let missing: Vec<TaskId> = ids
            .iter()
            .filter(|id| !self.original.contains_key(*id))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let loaded = self
            .repo
            .get_by_ids(self.ctx, &missing)
            .map_err(EngineError::storage(self.op))?;
        for task in loaded {
            self.tasks.insert(task.id.clone(), task.clone());
            self.original.insert(task.id.clone(), task);
        }
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> EngineResult<&Task> {
        self.tasks.get(id).ok_or_else(|| EngineError::task_not_found(id))
    }

    pub fn get_mut(&mut self, id: &TaskId) -> EngineResult<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::task_not_found(id))
    }

    /// The whole working set, for graph-wide checks and rewiring
    pub fn tasks(&self) -> &TaskMap {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskMap {
        &mut self.tasks
    }

    pub fn insert_new(&mut self, task: Task) {
        self.created.insert(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn remove(&mut self, id: &TaskId) -> EngineResult<Task> {
        self.created.remove(id);
        self.tasks
            .remove(id)
            .ok_or_else(|| EngineError::task_not_found(id))
    }

    fn change_set(&self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for (id, task) in &self.tasks {
            if self.created.contains(id) {
                changes.creates.push(task.clone());
            } else if self.original.get(id) != Some(task) {
                changes.updates.push(task.clone());
            }
        }
        for (id, task) in &self.original {
            match self.tasks.get(id) {
                None => changes.deletes.push((id.clone(), task.version)),
                Some(current) if current == task => changes.reads.push((id.clone(), task.version)),
                Some(_) => {}
            }
        }
        changes.whole_store = self.whole_store;
        changes
    }

    /// Writes every change in one atomic commit.
    ///
    /// Returns the working set with the versions the repository assigned.
    pub fn commit(mut self) -> EngineResult<TaskMap> {
        let changes = self.change_set();
        // reads alone never need a round trip
        if changes.is_empty() {
            debug!(op = self.op, "nothing to commit");
            return Ok(self.tasks);
        }

        debug!(
            op = self.op,
            request_id = %self.ctx.request_id,
            creates = changes.creates.len(),
            updates = changes.updates.len(),
            deletes = changes.deletes.len(),
            "committing"
        );

        let written = self
            .repo
            .commit(self.ctx, changes)
            .map_err(EngineError::storage(self.op))?;
        for task in written {
            self.tasks.insert(task.id.clone(), task);
        }
        Ok(self.tasks)
    }
}
