//! Structural graph operations: advertise, stitch, merge, split
//!
//! Each runs inside one transaction over the full task set. Edges are
//! added with the cycle check from [`crate::domain::graph`]; any failure
//! discards the working copy, so no operation leaves a partial rewire.

use chrono::Utc;
use tracing::info;

use crate::domain::graph::{has_cycle_through, link, replace_references};
use crate::domain::{Stage, Task, TaskId};
use crate::storage::{RequestContext, TagCollision};

use super::error::{EngineError, EngineResult};
use super::TaskEngine;

fn dedup_ids(ids: &[TaskId]) -> Vec<TaskId> {
    let mut out: Vec<TaskId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

/// Folds `from` into `to`, leaving references to `from` untouched
fn absorb(to: &mut Task, from: &Task, collision: TagCollision) {
    let description: Vec<&str> = [to.description.as_str(), from.description.as_str()]
        .into_iter()
        .filter(|d| !d.trim().is_empty())
        .collect();
    to.description = description.join("\n");

    to.points.extend(from.points.iter().cloned());
    to.status_history.extend(from.status_history.iter().cloned());

    let now = Utc::now();
    to.schedule
        .work_intervals
        .extend(from.schedule.work_intervals.iter().cloned().map(|mut interval| {
            if interval.stop.is_none() {
                interval.stop = Some(now);
            }
            interval
        }));
    if to.schedule.due.is_none() {
        to.schedule.due = from.schedule.due;
    }

    to.merge_tags(from.tags.clone(), collision == TagCollision::TakeSource);

    for inflow in from.inflows.iter().filter(|id| **id != to.id) {
        to.inflows.add(inflow.clone());
    }
    for outflow in from.outflows.iter().filter(|id| **id != to.id) {
        to.outflows.add(outflow.clone());
    }

    to.add_status_update(format!("Merged with task {}", from.id));
}

impl TaskEngine {
    /// Makes every target depend on `source`
    pub fn advertise_task(
        &self,
        ctx: &RequestContext,
        source: &TaskId,
        targets: &[TaskId],
    ) -> EngineResult<Task> {
        if targets.is_empty() {
            return Err(EngineError::validation("at least one target is required"));
        }
        let targets = dedup_ids(targets);

        let (_, mut committed) = self.structural(ctx, "advertise task", |tx| {
            tx.get(source)?;
            for target in &targets {
                link(tx.tasks_mut(), source, target)?;
            }
            Ok(())
        })?;

        info!(task_id = %source, targets = targets.len(), "task advertised");
        committed
            .remove(source)
            .ok_or_else(|| EngineError::task_not_found(source))
    }

    /// Makes `target` depend on every source.
    ///
    /// Returns the sources followed by the target.
    pub fn stitch_tasks(
        &self,
        ctx: &RequestContext,
        sources: &[TaskId],
        target: &TaskId,
    ) -> EngineResult<Vec<Task>> {
        if sources.is_empty() {
            return Err(EngineError::validation("at least one source is required"));
        }
        let sources = dedup_ids(sources);

        let (_, mut committed) = self.structural(ctx, "stitch tasks", |tx| {
            tx.get(target)?;
            for source in &sources {
                link(tx.tasks_mut(), source, target)?;
            }
            Ok(())
        })?;

        info!(task_id = %target, sources = sources.len(), "tasks stitched");
        sources
            .iter()
            .chain(std::iter::once(target))
            .map(|id| {
                committed
                    .remove(id)
                    .ok_or_else(|| EngineError::task_not_found(id))
            })
            .collect()
    }

    /// Folds `from` into `to` and deletes `from`
    pub fn merge_tasks(&self, ctx: &RequestContext, from: &TaskId, to: &TaskId) -> EngineResult<Task> {
        if from == to {
            return Err(EngineError::validation("cannot merge a task into itself"));
        }
        let collision = self.policy.merge_tag_collision;

        let (_, mut committed) = self.structural(ctx, "merge tasks", |tx| {
            let source = tx.get(from)?.clone();
            let dest = tx.get(to)?;
            if !source.same_chain(dest) {
                return Err(EngineError::ChainMismatch {
                    from: from.clone(),
                    to: to.clone(),
                });
            }

            absorb(tx.get_mut(to)?, &source, collision);
            tx.remove(from)?;
            replace_references(tx.tasks_mut(), from, to);

            if has_cycle_through(tx.tasks(), to) {
                return Err(EngineError::Cycle {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
            Ok(())
        })?;

        info!(from = %from, to = %to, "tasks merged");
        committed
            .remove(to)
            .ok_or_else(|| EngineError::task_not_found(to))
    }

    /// Replaces a task with a chain of new tasks.
    ///
    /// The first new task takes over every reference to the original; the
    /// rest follow it in order.
    pub fn split_task(
        &self,
        ctx: &RequestContext,
        id: &TaskId,
        names: &[String],
        descriptions: &[String],
    ) -> EngineResult<Vec<Task>> {
        if names.is_empty() {
            return Err(EngineError::validation("at least one new name is required"));
        }
        if names.len() != descriptions.len() {
            return Err(EngineError::Validation(format!(
                "got {} names but {} descriptions",
                names.len(),
                descriptions.len()
            )));
        }
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(EngineError::validation("task names must not be empty"));
        }
        let max_inbox = self.policy.max_inbox_size;

        let (new_ids, mut committed) = self.structural_with_inbox(ctx, "split task", |tx| {
            let original = tx.remove(id)?;
            if original.stage == Stage::Active {
                return Err(EngineError::InvalidState {
                    id: id.clone(),
                    stage: original.stage,
                    reason: "stop the task before splitting it".to_string(),
                });
            }
            if original.stage == Stage::Inbox {
                let in_inbox = tx
                    .tasks()
                    .values()
                    .filter(|t| t.stage == Stage::Inbox)
                    .count();
                if in_inbox + names.len() > max_inbox {
                    return Err(EngineError::Validation(format!(
                        "splitting into {} tasks would overflow the inbox ({} of {})",
                        names.len(),
                        in_inbox,
                        max_inbox
                    )));
                }
            }

            let mut new_ids = Vec::with_capacity(names.len());
            for (i, (name, description)) in names.iter().zip(descriptions).enumerate() {
                let mut task = Task::new(name.trim(), description.as_str(), original.user_id.clone());
                task.stage = original.stage;
                task.status = original.status;
                task.location = original.location.clone();
                task.tags = original.tags.clone();
                if i == 0 {
                    task.inflows = original.inflows.clone();
                    task.outflows = original.outflows.clone();
                }
                task.add_status_update(format!("Split from task {}", id));
                new_ids.push(task.id.clone());
                tx.insert_new(task);
            }

            replace_references(tx.tasks_mut(), id, &new_ids[0]);
            for pair in new_ids.windows(2) {
                link(tx.tasks_mut(), &pair[0], &pair[1])?;
            }
            Ok(new_ids)
        })?;

        info!(task_id = %id, parts = new_ids.len(), "task split");
        new_ids
            .iter()
            .map(|new_id| {
                committed
                    .remove(new_id)
                    .ok_or_else(|| EngineError::task_not_found(new_id))
            })
            .collect()
    }
}
