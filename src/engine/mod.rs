//! # Task Engine
//!
//! Lifecycle operations (add, stage, start, stop, complete), graph
//! mutations (merge, split, advertise, stitch) and graph queries over a
//! [`TaskRepository`].
//!
//! ## Consistency
//!
//! Every operation reads into a [`Transaction`](transaction::Transaction),
//! validates, mutates the working copy and commits one versioned change
//! set. Nothing is written when any step fails. Structural operations run
//! under the graph-wide write lock and retry when another process wins a
//! version race; lifecycle operations only lock the tasks they write.

pub mod background;
mod error;
mod lifecycle;
pub mod locks;
mod mutator;
mod query;
pub mod transaction;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{NotificationKind, Task, TaskId, User, UserId};
use crate::storage::config::{BackgroundConfig, EngineConfig};
use crate::storage::{RequestContext, TaskRepository, UserRepository};

use background::{BackgroundRunner, CalendarSync, CollaboratorError, Notifier};
use locks::GraphLocks;
use transaction::Transaction;

pub use error::{EngineError, EngineResult};
pub use lifecycle::Destination;
pub use query::DagView;

/// Coordinates task operations over a repository
pub struct TaskEngine {
    tasks: Arc<dyn TaskRepository>,
    users: Option<Arc<dyn UserRepository>>,
    policy: EngineConfig,
    locks: Arc<GraphLocks>,
    notifier: Option<Arc<dyn Notifier>>,
    calendar: Option<Arc<dyn CalendarSync>>,
    calendar_sync: bool,
    runner: Arc<BackgroundRunner>,
}

impl TaskEngine {
    pub fn new(tasks: Arc<dyn TaskRepository>, policy: EngineConfig) -> Self {
        Self {
            tasks,
            users: None,
            policy,
            locks: Arc::new(GraphLocks::new()),
            notifier: None,
            calendar: None,
            calendar_sync: true,
            runner: Arc::new(BackgroundRunner::new(BackgroundConfig::default().timeout())),
        }
    }

    /// Validates owners against `users` and enables per-user notifications
    pub fn with_users(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarSync>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn with_background(mut self, config: &BackgroundConfig) -> Self {
        self.runner = Arc::new(BackgroundRunner::new(config.timeout()));
        self.calendar_sync = config.calendar_sync;
        self
    }

    pub fn policy(&self) -> &EngineConfig {
        &self.policy
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.tasks
    }

    pub fn background(&self) -> &BackgroundRunner {
        &self.runner
    }

    /// Runs a graph-wide operation under the write lock, retrying on version
    /// conflicts with writers outside this process.
    fn structural<R>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        f: impl Fn(&mut Transaction<'_>) -> EngineResult<R>,
    ) -> EngineResult<(R, crate::domain::TaskMap)> {
        self.locks.with_graph_write(|| self.retrying(ctx, op, f))
    }

    /// Like [`Self::structural`] but also holds the inbox lock
    fn structural_with_inbox<R>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        f: impl Fn(&mut Transaction<'_>) -> EngineResult<R>,
    ) -> EngineResult<(R, crate::domain::TaskMap)> {
        self.locks
            .with_graph_write_and_inbox(|| self.retrying(ctx, op, f))
    }

    fn retrying<R>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        f: impl Fn(&mut Transaction<'_>) -> EngineResult<R>,
    ) -> EngineResult<(R, crate::domain::TaskMap)> {
        let mut attempt = 0;
        loop {
            let mut tx = Transaction::begin_all(self.tasks.as_ref(), ctx, op)?;
            let out = f(&mut tx)?;
            match tx.commit() {
                Ok(tasks) => return Ok((out, tasks)),
                Err(EngineError::Conflict(id)) if attempt < self.policy.structural_retries => {
                    attempt += 1;
                    warn!(op, task_id = %id, attempt, "version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Looks up the owner, failing with not-found when a user directory is
    /// configured and does not know the user
    fn owner(&self, ctx: &RequestContext, id: &UserId) -> EngineResult<Option<User>> {
        match &self.users {
            Some(users) => users
                .get_by_id(ctx, id)
                .map(Some)
                .map_err(EngineError::storage("get user")),
            None => Ok(None),
        }
    }

    /// Sends a notification on the background runner if the owner opted in
    fn notify(&self, kind: NotificationKind, task: &Task) {
        let (Some(notifier), Some(users)) = (&self.notifier, &self.users) else {
            return;
        };
        let notifier = Arc::clone(notifier);
        let users = Arc::clone(users);
        let task = task.clone();

        self.runner.spawn("notify", async move {
            let ctx = RequestContext::background("notify");
            let user = match users.get_by_id(&ctx, &task.user_id) {
                Ok(user) => user,
                Err(e) => {
                    debug!(task_id = %task.id, error = %e, "no user to notify");
                    return Ok(());
                }
            };
            if !user.wants(kind) {
                return Ok(());
            }
            match kind {
                NotificationKind::OnAssign => notifier.task_assigned(&user, &task).await,
                NotificationKind::OnStart => notifier.task_started(&user, &task).await,
                NotificationKind::DaysBeforeDue => Ok(()),
            }
        });
    }

    /// Pushes a started task to the calendar and records the event ID
    fn sync_calendar(&self, task: &Task) {
        let Some(calendar) = self.calendar.as_ref().filter(|_| self.calendar_sync) else {
            return;
        };
        let calendar = Arc::clone(calendar);
        let repo = Arc::clone(&self.tasks);
        let locks = Arc::clone(&self.locks);
        let task = task.clone();

        self.runner.spawn("calendar", async move {
            let Some(event_id) = calendar.task_started(&task).await? else {
                return Ok(());
            };
            let id = task.id;
            tokio::task::spawn_blocking(move || store_calendar_event(repo.as_ref(), &locks, &id, event_id))
                .await
                .map_err(|e| CollaboratorError::Failed(e.to_string()))?
                .map_err(|e| CollaboratorError::Failed(e.to_string()))
        });
    }
}

fn store_calendar_event(
    repo: &dyn TaskRepository,
    locks: &GraphLocks,
    id: &TaskId,
    event_id: String,
) -> EngineResult<()> {
    let ctx = RequestContext::background("calendar-sync");
    locks.with_tasks(&[id], || {
        let mut tx = Transaction::begin_with(repo, &ctx, "store calendar event", &[id])?;
        tx.get_mut(id)?.calendar_event_id = Some(event_id);
        tx.commit()?;
        Ok(())
    })
}
