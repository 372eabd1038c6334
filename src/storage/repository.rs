//! Repository contracts the engine persists through
//!
//! Every call takes a [`RequestContext`] so a caller's deadline is honoured
//! all the way down. Writes go through [`TaskRepository::commit`], which
//! applies a whole [`ChangeSet`] or nothing.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::domain::{Stage, Task, TaskId, User, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Task already exists: {0}")]
    AlreadyExists(TaskId),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: TaskId,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid change set: {0}")]
    InvalidChangeSet(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn task_not_found(id: &TaskId) -> Self {
        Self::NotFound {
            kind: "task",
            id: id.to_string(),
        }
    }

    pub fn user_not_found(id: &UserId) -> Self {
        Self::NotFound {
            kind: "user",
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Request-scoped identity and deadline
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// A context with a fresh request ID and no deadline
    pub fn new() -> Self {
        let seq = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            request_id: format!("req-{}", seq),
            deadline: None,
        }
    }

    /// Context for work that does not belong to any caller's request
    pub fn background(label: &str) -> Self {
        Self {
            request_id: label.to_string(),
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fails with [`StoreError::DeadlineExceeded`] once the deadline has passed
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_expired() {
            Err(StoreError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A batch of writes applied atomically.
///
/// Updates and deletes carry the version the writer last read; the
/// repository rejects the whole batch if any of them is stale. `reads`
/// holds tasks the writer looked at without writing, and `whole_store`
/// marks a batch computed from a full snapshot: any task the writer never
/// saw (one created by another process meanwhile) is then a conflict too.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub creates: Vec<Task>,
    pub updates: Vec<Task>,
    pub deletes: Vec<(TaskId, u64)>,
    pub reads: Vec<(TaskId, u64)>,
    pub whole_store: bool,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, task: Task) -> Self {
        self.creates.push(task);
        self
    }

    pub fn update(mut self, task: Task) -> Self {
        self.updates.push(task);
        self
    }

    pub fn delete(mut self, id: TaskId, expected_version: u64) -> Self {
        self.deletes.push((id, expected_version));
        self
    }

    /// Requires `id` to still be at `version` when the batch is applied
    pub fn read(mut self, id: TaskId, version: u64) -> Self {
        self.reads.push((id, version));
        self
    }

    pub fn whole_store(mut self) -> Self {
        self.whole_store = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Validates a change set against the current contents, then applies it.
///
/// Nothing is written unless every check passes. Returns the created and
/// updated tasks with their new versions.
pub(crate) fn apply_change_set(
    tasks: &mut BTreeMap<TaskId, Task>,
    changes: ChangeSet,
) -> Result<Vec<Task>, StoreError> {
    let mut seen: HashSet<&TaskId> = HashSet::new();

    for task in &changes.creates {
        if tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(task.id.clone()));
        }
        if !seen.insert(&task.id) {
            return Err(StoreError::InvalidChangeSet(format!(
                "{} appears more than once",
                task.id
            )));
        }
    }
    let writes = changes
        .updates
        .iter()
        .map(|t| (&t.id, t.version))
        .chain(changes.deletes.iter().map(|(id, v)| (id, *v)));
    for (id, expected) in writes {
        if !seen.insert(id) {
            return Err(StoreError::InvalidChangeSet(format!(
                "{} appears more than once",
                id
            )));
        }
        let current = tasks.get(id).ok_or_else(|| StoreError::task_not_found(id))?;
        if current.version != expected {
            return Err(StoreError::Conflict {
                id: id.clone(),
                expected,
                actual: current.version,
            });
        }
    }
    for (id, expected) in &changes.reads {
        // a read task that has since been deleted reports version 0
        let actual = tasks.get(id).map_or(0, |t| t.version);
        if actual != *expected {
            return Err(StoreError::Conflict {
                id: id.clone(),
                expected: *expected,
                actual,
            });
        }
        seen.insert(id);
    }
    if changes.whole_store {
        if let Some(unseen) = tasks.values().find(|t| !seen.contains(&t.id)) {
            return Err(StoreError::Conflict {
                id: unseen.id.clone(),
                expected: 0,
                actual: unseen.version,
            });
        }
    }

    let mut written = Vec::with_capacity(changes.creates.len() + changes.updates.len());
    for mut task in changes.creates {
        task.version = 1;
        tasks.insert(task.id.clone(), task.clone());
        written.push(task);
    }
    for mut task in changes.updates {
        task.version += 1;
        tasks.insert(task.id.clone(), task.clone());
        written.push(task);
    }
    for (id, _) in changes.deletes {
        tasks.remove(&id);
    }
    Ok(written)
}

/// Persistence for tasks
pub trait TaskRepository: Send + Sync {
    fn get_by_id(&self, ctx: &RequestContext, id: &TaskId) -> Result<Task, StoreError>;

    fn list_all(&self, ctx: &RequestContext) -> Result<Vec<Task>, StoreError>;

    /// Atomically applies a change set
    fn commit(&self, ctx: &RequestContext, changes: ChangeSet) -> Result<Vec<Task>, StoreError>;

    fn create(&self, ctx: &RequestContext, task: Task) -> Result<Task, StoreError> {
        let id = task.id.clone();
        self.commit(ctx, ChangeSet::new().create(task))?
            .pop()
            .ok_or_else(|| StoreError::task_not_found(&id))
    }

    /// Writes a task read at `task.version`
    fn update(&self, ctx: &RequestContext, task: Task) -> Result<Task, StoreError> {
        let id = task.id.clone();
        self.commit(ctx, ChangeSet::new().update(task))?
            .pop()
            .ok_or_else(|| StoreError::task_not_found(&id))
    }

    fn delete(&self, ctx: &RequestContext, id: &TaskId) -> Result<(), StoreError> {
        let current = self.get_by_id(ctx, id)?;
        self.commit(ctx, ChangeSet::new().delete(id.clone(), current.version))?;
        Ok(())
    }

    fn list_by_stage(&self, ctx: &RequestContext, stage: Stage) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .list_all(ctx)?
            .into_iter()
            .filter(|t| t.stage == stage)
            .collect())
    }

    fn list_by_user(&self, ctx: &RequestContext, user: &UserId) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .list_all(ctx)?
            .into_iter()
            .filter(|t| &t.user_id == user)
            .collect())
    }

    /// Fetches several tasks; any missing ID is a not-found error
    fn get_by_ids(&self, ctx: &RequestContext, ids: &[TaskId]) -> Result<Vec<Task>, StoreError> {
        ids.iter().map(|id| self.get_by_id(ctx, id)).collect()
    }

    fn count_by_stage(&self, ctx: &RequestContext, stage: Stage) -> Result<usize, StoreError> {
        Ok(self.list_by_stage(ctx, stage)?.len())
    }
}

/// Read access to users, used to validate owners and address notifications
pub trait UserRepository: Send + Sync {
    fn get_by_id(&self, ctx: &RequestContext, id: &UserId) -> Result<User, StoreError>;

    fn list_all(&self, ctx: &RequestContext) -> Result<Vec<User>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> Task {
        Task::new(name, "", "u1".parse().unwrap())
    }

    #[test]
    fn apply_creates_and_bumps_versions() {
        let mut map = BTreeMap::new();
        let written = apply_change_set(&mut map, ChangeSet::new().create(task("A"))).unwrap();
        assert_eq!(written[0].version, 1);

        let written = apply_change_set(&mut map, ChangeSet::new().update(written[0].clone())).unwrap();
        assert_eq!(written[0].version, 2);
    }

    #[test]
    fn stale_update_rejects_whole_batch() {
        let mut map = BTreeMap::new();
        let a = apply_change_set(&mut map, ChangeSet::new().create(task("A"))).unwrap().remove(0);
        let b = apply_change_set(&mut map, ChangeSet::new().create(task("B"))).unwrap().remove(0);

        let mut stale = a.clone();
        stale.version = 0;
        let mut renamed = b.clone();
        renamed.name = "B2".into();

        let err = apply_change_set(
            &mut map,
            ChangeSet::new().update(renamed).update(stale).create(task("C")),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 0, actual: 1, .. }));
        assert_eq!(map.len(), 2);
        assert_eq!(map[&b.id].name, "B");
    }

    #[test]
    fn update_and_delete_same_id_rejected() {
        let mut map = BTreeMap::new();
        let a = apply_change_set(&mut map, ChangeSet::new().create(task("A"))).unwrap().remove(0);
        let err = apply_change_set(
            &mut map,
            ChangeSet::new().update(a.clone()).delete(a.id.clone(), a.version),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidChangeSet(_)));
    }

    #[test]
    fn stale_read_rejects_batch() {
        let mut map = BTreeMap::new();
        let a = apply_change_set(&mut map, ChangeSet::new().create(task("A"))).unwrap().remove(0);
        let b = apply_change_set(&mut map, ChangeSet::new().create(task("B"))).unwrap().remove(0);

        // someone else rewrites B after we read it
        apply_change_set(&mut map, ChangeSet::new().update(b.clone())).unwrap();

        let mut renamed = a.clone();
        renamed.name = "A2".into();
        let err = apply_change_set(
            &mut map,
            ChangeSet::new().update(renamed).read(b.id.clone(), b.version),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2, .. }));
        assert_eq!(map[&a.id].name, "A");
    }

    #[test]
    fn whole_store_batch_rejects_unseen_task() {
        let mut map = BTreeMap::new();
        let a = apply_change_set(&mut map, ChangeSet::new().create(task("A"))).unwrap().remove(0);
        let snapshot = ChangeSet::new().read(a.id.clone(), a.version).whole_store();

        let late = apply_change_set(&mut map, ChangeSet::new().create(task("B"))).unwrap().remove(0);

        let err = apply_change_set(&mut map, snapshot.clone().create(task("C"))).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref id, .. } if *id == late.id));
        assert_eq!(map.len(), 2);

        // without the flag only the listed read is checked
        let mut partial = snapshot;
        partial.whole_store = false;
        apply_change_set(&mut map, partial.create(task("C"))).unwrap();
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let mut map = BTreeMap::new();
        let err = apply_change_set(&mut map, ChangeSet::new().delete("t-x".parse().unwrap(), 1))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn expired_context() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(0));
        assert!(matches!(ctx.check(), Err(StoreError::DeadlineExceeded)));
        assert!(RequestContext::new().check().is_ok());
    }
}
