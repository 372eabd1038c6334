//! Read-only queries: lookups, listings, DAG view, integrity scan

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::error;

use crate::domain::dag::{render_text, topological_sort};
use crate::domain::graph::check_integrity;
use crate::domain::{
    minimum_unique_prefix, resolve_prefix, IntegrityViolation, Stage, Task, TaskId, TaskMap, UserId,
};
use crate::storage::RequestContext;

use super::error::{EngineError, EngineResult};
use super::TaskEngine;

/// Topologically ordered tasks plus the shortest unambiguous ID for each
#[derive(Debug, Clone, Serialize)]
pub struct DagView {
    pub tasks: Vec<Task>,
    pub prefixes: BTreeMap<TaskId, String>,
}

impl DagView {
    pub fn render(&self) -> String {
        render_text(&self.tasks, |id| {
            self.prefixes
                .get(id)
                .cloned()
                .unwrap_or_else(|| id.to_string())
        })
    }
}

impl TaskEngine {
    pub fn get_task(&self, ctx: &RequestContext, id: &TaskId) -> EngineResult<Task> {
        self.tasks
            .get_by_id(ctx, id)
            .map_err(EngineError::storage("get task"))
    }

    /// Lists tasks, optionally filtered, oldest first
    pub fn list_tasks(
        &self,
        ctx: &RequestContext,
        stage: Option<Stage>,
        user: Option<&UserId>,
    ) -> EngineResult<Vec<Task>> {
        let mut tasks = match (stage, user) {
            (Some(stage), _) => self.tasks.list_by_stage(ctx, stage),
            (None, Some(user)) => self.tasks.list_by_user(ctx, user),
            (None, None) => self.tasks.list_all(ctx),
        }
        .map_err(EngineError::storage("list tasks"))?;

        if let (Some(_), Some(user)) = (stage, user) {
            tasks.retain(|t| &t.user_id == user);
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// Orders a user's tasks (or all tasks) so dependencies come first
    pub fn get_task_dag(&self, ctx: &RequestContext, user: Option<&UserId>) -> EngineResult<DagView> {
        let all = self
            .tasks
            .list_all(ctx)
            .map_err(EngineError::storage("load graph"))?;
        let known: Vec<TaskId> = all.iter().map(|t| t.id.clone()).collect();

        let selected: Vec<Task> = match user {
            Some(user) => all.into_iter().filter(|t| &t.user_id == user).collect(),
            None => all,
        };

        let tasks = topological_sort(selected).map_err(|e| {
            error!(error = %e, "dependency graph is not acyclic");
            EngineError::from(e)
        })?;
        let prefixes = tasks
            .iter()
            .map(|t| (t.id.clone(), minimum_unique_prefix(&known, &t.id)))
            .collect();

        Ok(DagView { tasks, prefixes })
    }

    /// Expands an abbreviated task ID, optionally among one user's tasks
    pub fn resolve_task_id(
        &self,
        ctx: &RequestContext,
        partial: &str,
        user: Option<&UserId>,
    ) -> EngineResult<TaskId> {
        let tasks = match user {
            Some(user) => self.tasks.list_by_user(ctx, user),
            None => self.tasks.list_all(ctx),
        }
        .map_err(EngineError::storage("resolve task id"))?;
        let known: Vec<TaskId> = tasks.into_iter().map(|t| t.id).collect();
        Ok(resolve_prefix(&known, partial)?)
    }

    /// Scans storage for reciprocity, dangling references and cycles
    pub fn check_integrity(&self, ctx: &RequestContext) -> EngineResult<Vec<IntegrityViolation>> {
        let tasks: TaskMap = self
            .tasks
            .list_all(ctx)
            .map_err(EngineError::storage("check integrity"))?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let violations = check_integrity(&tasks);
        for violation in &violations {
            error!(%violation, "integrity violation");
        }
        Ok(violations)
    }
}
