//! Best-effort work that runs off the request path
//!
//! Notifications, calendar sync and due-date reminders run as tokio tasks on
//! a [`BackgroundRunner`]. Every job races its timeout and the runner's
//! shutdown signal; whichever fires first drops the job's future, which
//! aborts it at its next await point. Failures are logged and never reach
//! the caller.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::reminder::select_due_reminders;
use crate::domain::{Reminder, Task, User};
use crate::logging::duration_ms;
use crate::storage::{RequestContext, StoreError, TaskRepository, UserRepository};

const WORKER_THREADS: usize = 2;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("{0}")]
    Failed(String),
}

/// What a collaborator call resolves to
pub type CollaboratorFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CollaboratorError>> + Send + 'a>>;

/// Delivers user-facing notifications (email, chat, ...)
pub trait Notifier: Send + Sync {
    fn task_assigned<'a>(&'a self, user: &'a User, task: &'a Task) -> CollaboratorFuture<'a, ()>;

    fn task_started<'a>(&'a self, user: &'a User, task: &'a Task) -> CollaboratorFuture<'a, ()>;

    fn due_reminder<'a>(&'a self, reminder: &'a Reminder) -> CollaboratorFuture<'a, ()>;
}

/// Mirrors started tasks into an external calendar
pub trait CalendarSync: Send + Sync {
    /// Resolves to the calendar event ID, if one was created
    fn task_started<'a>(&'a self, task: &'a Task) -> CollaboratorFuture<'a, Option<String>>;
}

/// Notifier that only records deliveries in the log
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn task_assigned<'a>(&'a self, user: &'a User, task: &'a Task) -> CollaboratorFuture<'a, ()> {
        Box::pin(async move {
            info!(user_id = %user.id, email = %user.email, task_id = %task.id, "notify: task assigned");
            Ok(())
        })
    }

    fn task_started<'a>(&'a self, user: &'a User, task: &'a Task) -> CollaboratorFuture<'a, ()> {
        Box::pin(async move {
            info!(user_id = %user.id, email = %user.email, task_id = %task.id, "notify: task started");
            Ok(())
        })
    }

    fn due_reminder<'a>(&'a self, reminder: &'a Reminder) -> CollaboratorFuture<'a, ()> {
        Box::pin(async move {
            info!(
                user_id = %reminder.user_id,
                task_id = %reminder.task_id,
                days_before = reminder.days_before,
                "notify: task due soon"
            );
            Ok(())
        })
    }
}

/// How a supervised job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Runs best-effort jobs on a private tokio runtime with a timeout.
///
/// The runtime is started by the first job, so engines that never hand
/// anything off do not pay for worker threads.
pub struct BackgroundRunner {
    timeout: Duration,
    runtime: OnceLock<Runtime>,
    shutdown: watch::Sender<bool>,
    pending: Mutex<Vec<JoinHandle<JobOutcome>>>,
}

impl BackgroundRunner {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            timeout,
            runtime: OnceLock::new(),
            shutdown,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn runtime(&self) -> io::Result<&Runtime> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("tasker-background")
            .enable_all()
            .build()?;
        Ok(self.runtime.get_or_init(|| runtime))
    }

    /// Cancels every running job and any job spawned afterwards
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Starts `job` and returns immediately
    pub fn spawn<F>(&self, label: &'static str, job: F)
    where
        F: Future<Output = Result<(), CollaboratorError>> + Send + 'static,
    {
        let runtime = match self.runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(job = label, error = %e, "background runtime unavailable, job dropped");
                return;
            }
        };
        let timeout = self.timeout;
        let shutdown = self.shutdown.subscribe();

        let handle = runtime.spawn(async move {
            let outcome = tokio::select! {
                _ = stopped(shutdown) => JobOutcome::Cancelled,
                result = tokio::time::timeout(timeout, job) => match result {
                    Ok(Ok(())) => JobOutcome::Completed,
                    Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
                    Err(_) => JobOutcome::TimedOut,
                },
            };
            log_outcome(label, timeout, &outcome);
            outcome
        });

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Waits for every job started so far and returns their outcomes
    pub fn drain(&self) -> Vec<JobOutcome> {
        let handles: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let Some(runtime) = self.runtime.get() else {
            return Vec::new();
        };
        runtime.block_on(async move {
            let mut outcomes = Vec::with_capacity(handles.len());
            for handle in handles {
                let outcome = handle
                    .await
                    .unwrap_or_else(|e| JobOutcome::Failed(format!("job panicked: {}", e)));
                outcomes.push(outcome);
            }
            outcomes
        })
    }
}

impl Drop for BackgroundRunner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Resolves once shutdown is requested or the runner is gone
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

fn log_outcome(label: &'static str, timeout: Duration, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Completed => debug!(job = label, "background job completed"),
        JobOutcome::Failed(reason) => warn!(job = label, error = %reason, "background job failed"),
        JobOutcome::TimedOut => {
            warn!(job = label, timeout_ms = duration_ms(timeout), "background job timed out")
        }
        JobOutcome::Cancelled => debug!(job = label, "background job cancelled"),
    }
}

/// Periodically notifies users about tasks approaching their due date
pub struct ReminderSweeper {
    tasks: Arc<dyn TaskRepository>,
    users: Arc<dyn UserRepository>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
}

impl ReminderSweeper {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        users: Arc<dyn UserRepository>,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            tasks,
            users,
            notifier,
            interval,
        }
    }

    /// Runs one sweep and returns the number of reminders delivered.
    ///
    /// Delivery failures are logged and skipped; storage failures abort the sweep.
    pub async fn sweep_once(&self, ctx: &RequestContext) -> Result<usize, StoreError> {
        let users = self.users.list_all(ctx)?;
        let tasks = self.tasks.list_all(ctx)?;
        let reminders = select_due_reminders(&users, &tasks, Utc::now());

        let mut delivered = 0;
        for reminder in &reminders {
            match self.notifier.due_reminder(reminder).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    task_id = %reminder.task_id,
                    user_id = %reminder.user_id,
                    error = %e,
                    "due reminder failed"
                ),
            }
        }
        debug!(candidates = reminders.len(), delivered, "reminder sweep finished");
        Ok(delivered)
    }

    /// Sweeps immediately and then once per interval until `stop` fires
    /// or its sender is dropped
    pub async fn run(self, mut stop: oneshot::Receiver<()>) {
        loop {
            let ctx = RequestContext::background("reminder-sweep");
            if let Err(e) = self.sweep_once(&ctx).await {
                warn!(error = %e, "reminder sweep failed");
            }
            tokio::select! {
                _ = &mut stop => {
                    debug!("reminder sweeper stopped");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
