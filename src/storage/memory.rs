//! In-memory repositories
//!
//! Used by tests and by embedders that keep state in process.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::domain::{Task, TaskId, User, UserId};

use super::repository::{
    apply_change_set, ChangeSet, RequestContext, StoreError, TaskRepository, UserRepository,
};

#[derive(Debug, Default)]
pub struct MemoryTaskRepository {
    tasks: RwLock<BTreeMap<TaskId, Task>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskRepository for MemoryTaskRepository {
    fn get_by_id(&self, ctx: &RequestContext, id: &TaskId) -> Result<Task, StoreError> {
        ctx.check()?;
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::task_not_found(id))
    }

    fn list_all(&self, ctx: &RequestContext) -> Result<Vec<Task>, StoreError> {
        ctx.check()?;
        Ok(self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    fn commit(&self, ctx: &RequestContext, changes: ChangeSet) -> Result<Vec<Task>, StoreError> {
        ctx.check()?;
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        apply_change_set(&mut tasks, changes)
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: RwLock<BTreeMap<UserId, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a user
    pub fn insert(&self, user: User) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.id.clone(), user);
    }
}

impl UserRepository for MemoryUserRepository {
    fn get_by_id(&self, ctx: &RequestContext, id: &UserId) -> Result<User, StoreError> {
        ctx.check()?;
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::user_not_found(id))
    }

    fn list_all(&self, ctx: &RequestContext) -> Result<Vec<User>, StoreError> {
        ctx.check()?;
        Ok(self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }
}
