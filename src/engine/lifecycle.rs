//! Stage transitions: add, stage, start, stop, complete
//!
//! ```text
//! (new) -> Inbox -> Staging -> Active -> Staging   (stopped, incomplete)
//!                                     -> Archived  (stopped complete, or forced)
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::graph::link;
use crate::domain::{
    NotificationKind, Point, Stage, Tags, Task, TaskId, TaskStatus, UserId,
};
use crate::storage::RequestContext;

use super::error::{EngineError, EngineResult};
use super::transaction::Transaction;
use super::TaskEngine;

/// Where a task is staged: after an existing task, or at an explicit location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Task(TaskId),
    Location(Vec<String>),
}

impl Destination {
    /// Builds a destination from the two optional request forms.
    ///
    /// Exactly one of them must be present.
    pub fn from_parts(task: Option<TaskId>, location: Vec<String>) -> EngineResult<Self> {
        match (task, location.is_empty()) {
            (Some(_), false) => Err(EngineError::validation(
                "give either a destination task or a new location, not both",
            )),
            (None, true) => Err(EngineError::validation(
                "a destination task or a new location is required",
            )),
            (Some(id), true) => Ok(Destination::Task(id)),
            (None, false) => {
                if location.iter().any(|segment| segment.trim().is_empty()) {
                    return Err(EngineError::validation("location segments must not be empty"));
                }
                Ok(Destination::Location(location))
            }
        }
    }
}

/// Applies the staging changes shared by both destination forms
fn stage(task: &mut Task, location: Vec<String>, points: Option<Vec<Point>>, tags: Tags) {
    task.location = location;
    if let Some(points) = points.filter(|p| !p.is_empty()) {
        task.points = points;
    }
    if !tags.is_empty() {
        task.merge_tags(tags, true);
    }
    task.stage = Stage::Staging;
    let note = format!("Moved to staging at /{}", task.location_path());
    task.add_status_update(note);
}

impl TaskEngine {
    /// Creates a task in the inbox
    pub fn add_task(
        &self,
        ctx: &RequestContext,
        name: &str,
        description: &str,
        user_id: UserId,
    ) -> EngineResult<Task> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("task name must not be empty"));
        }
        self.owner(ctx, &user_id)?;

        let max_inbox = self.policy.max_inbox_size;
        // the count is taken from a full snapshot, so a task another process
        // adds before our commit turns into a conflict and a recount
        let (id, mut committed) = self.locks.with_inbox(|| {
            self.retrying(ctx, "add task", |tx| {
                let in_inbox = tx
                    .tasks()
                    .values()
                    .filter(|t| t.stage == Stage::Inbox)
                    .count();
                if in_inbox >= max_inbox {
                    return Err(EngineError::Validation(format!(
                        "inbox is full ({} of {} tasks)",
                        in_inbox, max_inbox
                    )));
                }

                let mut task = Task::new(name, description, user_id.clone());
                task.stage = Stage::Inbox;
                task.add_status_update("Added to inbox");
                let id = task.id.clone();
                tx.insert_new(task);
                Ok(id)
            })
        })?;
        let task = committed
            .remove(&id)
            .ok_or_else(|| EngineError::task_not_found(&id))?;

        info!(task_id = %task.id, user_id = %task.user_id, "task added");
        self.notify(NotificationKind::OnAssign, &task);
        Ok(task)
    }

    /// Moves a pending or inbox task into staging
    pub fn move_to_staging(
        &self,
        ctx: &RequestContext,
        source: &TaskId,
        destination: Destination,
        points: Option<Vec<Point>>,
        tags: Tags,
    ) -> EngineResult<Task> {
        let task = match destination {
            Destination::Location(location) => self.locks.with_tasks(&[source], || {
                let mut tx = Transaction::begin_with(self.tasks.as_ref(), ctx, "move to staging", &[source])?;
                let task = tx.get_mut(source)?;
                task.can_move_to_staging()?;
                stage(task, location, points, tags);
                let mut committed = tx.commit()?;
                committed
                    .remove(source)
                    .ok_or_else(|| EngineError::task_not_found(source))
            })?,
            // adopting a predecessor adds an edge, so this is structural
            Destination::Task(dest) => {
                let (_, mut committed) = self.structural(ctx, "move to staging", |tx| {
                    tx.get(source)?.can_move_to_staging()?;
                    let location = tx.get(&dest)?.location.clone();
                    link(tx.tasks_mut(), &dest, source)?;
                    stage(tx.get_mut(source)?, location, points.clone(), tags.clone());
                    Ok(())
                })?;
                committed
                    .remove(source)
                    .ok_or_else(|| EngineError::task_not_found(source))?
            }
        };

        info!(task_id = %task.id, location = %task.location_path(), "task staged");
        Ok(task)
    }

    /// Starts work on a task whose dependencies are all completed
    pub fn start_task(&self, ctx: &RequestContext, id: &TaskId) -> EngineResult<Task> {
        let task = self.locks.with_tasks(&[id], || {
            let mut tx = Transaction::begin_with(self.tasks.as_ref(), ctx, "start task", &[id])?;
            let task = tx.get(id)?;
            task.can_start()?;

            // predecessors join the snapshot so a concurrent change to one fails the commit
            let inflows: Vec<TaskId> = task.inflows.iter().cloned().collect();
            tx.include(&inflows).map_err(|e| match e {
                EngineError::NotFound { id: missing, .. } => EngineError::Integrity(format!(
                    "task {} has a dangling inflow: {}",
                    id, missing
                )),
                e => e,
            })?;
            for inflow in &inflows {
                if !tx.get(inflow)?.status.is_complete() {
                    return Err(EngineError::DependencyNotSatisfied {
                        task: id.clone(),
                        dependency: inflow.clone(),
                    });
                }
            }

            let task = tx.get_mut(id)?;
            task.open_interval(Utc::now());
            task.stage = Stage::Active;
            task.status = TaskStatus::InProgress;
            task.add_status_update("Started");

            tx.commit()?
                .remove(id)
                .ok_or_else(|| EngineError::task_not_found(id))
        })?;

        info!(task_id = %task.id, "task started");
        self.notify(NotificationKind::OnStart, &task);
        self.sync_calendar(&task);
        Ok(task)
    }

    /// Stops work, recording the points completed in this interval.
    ///
    /// Returns the task and whether it is now complete.
    pub fn stop_task(
        &self,
        ctx: &RequestContext,
        id: &TaskId,
        points_completed: Vec<Point>,
    ) -> EngineResult<(Task, bool)> {
        let zero_points_complete = self.policy.zero_point_tasks_complete;

        let (task, completed) = self.locks.with_tasks(&[id], || {
            let mut tx = Transaction::begin_with(self.tasks.as_ref(), ctx, "stop task", &[id])?;
            let task = tx.get_mut(id)?;
            task.can_stop()?;

            if !task.close_interval(Utc::now(), points_completed) {
                return Err(EngineError::Integrity(format!(
                    "active task {} has no open work interval",
                    id
                )));
            }

            let completed = task.is_complete(zero_points_complete);
            if completed {
                task.status = TaskStatus::Completed;
                task.stage = Stage::Archived;
                task.add_status_update("Stopped; all points completed");
            } else {
                task.status = TaskStatus::Todo;
                task.stage = Stage::Staging;
                let note = format!(
                    "Stopped; {} of {} points completed",
                    task.completed_points(),
                    task.total_points()
                );
                task.add_status_update(note);
            }

            let task = tx
                .commit()?
                .remove(id)
                .ok_or_else(|| EngineError::task_not_found(id))?;
            Ok((task, completed))
        })?;

        info!(task_id = %task.id, completed, "task stopped");
        Ok((task, completed))
    }

    /// Finishes an active task, crediting whatever is left of each declared point
    pub fn complete_task(&self, ctx: &RequestContext, id: &TaskId) -> EngineResult<Task> {
        let task = self.locks.with_tasks(&[id], || {
            let mut tx = Transaction::begin_with(self.tasks.as_ref(), ctx, "complete task", &[id])?;
            let task = tx.get_mut(id)?;
            task.can_complete()?;

            let credit = task.outstanding_points();
            if !task.close_interval(Utc::now(), credit) {
                return Err(EngineError::Integrity(format!(
                    "active task {} has no open work interval",
                    id
                )));
            }

            task.stage = Stage::Archived;
            task.status = TaskStatus::Completed;
            task.add_status_update("Marked complete");

            tx.commit()?
                .remove(id)
                .ok_or_else(|| EngineError::task_not_found(id))
        })?;

        info!(task_id = %task.id, "task completed");
        Ok(task)
    }

    /// Merges tags into a task; incoming values replace existing keys
    pub fn update_task_tags(&self, ctx: &RequestContext, id: &TaskId, tags: Tags) -> EngineResult<Task> {
        let task = self.locks.with_tasks(&[id], || {
            let mut tx = Transaction::begin_with(self.tasks.as_ref(), ctx, "update tags", &[id])?;
            tx.get_mut(id)?.merge_tags(tags, true);
            tx.commit()?
                .remove(id)
                .ok_or_else(|| EngineError::task_not_found(id))
        })?;
        debug!(task_id = %task.id, tags = task.tags.len(), "tags updated");
        Ok(task)
    }

    /// Sets or clears the due date
    pub fn set_due_date(
        &self,
        ctx: &RequestContext,
        id: &TaskId,
        due: Option<DateTime<Utc>>,
    ) -> EngineResult<Task> {
        let task = self.locks.with_tasks(&[id], || {
            let mut tx = Transaction::begin_with(self.tasks.as_ref(), ctx, "set due date", &[id])?;
            let task = tx.get_mut(id)?;
            task.schedule.due = due;
            let note = match due {
                Some(due) => format!("Due date set to {}", due.format("%Y-%m-%d")),
                None => "Due date cleared".to_string(),
            };
            task.add_status_update(note);
            tx.commit()?
                .remove(id)
                .ok_or_else(|| EngineError::task_not_found(id))
        })?;
        debug!(task_id = %task.id, "due date updated");
        Ok(task)
    }
}
