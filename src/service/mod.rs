//! # Service Facade
//!
//! Transport-agnostic RPC surface over [`TaskEngine`]. Each method parses
//! and resolves its input, dispatches to the engine inside a tracing span,
//! and maps [`EngineError`](crate::engine::EngineError) onto a [`Status`].

mod messages;
mod status;

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, info_span, warn};

use crate::domain::{TaskId, UserId};
use crate::engine::{Destination, EngineError, EngineResult, TaskEngine};
use crate::logging::duration_ms;
use crate::storage::RequestContext;

pub use messages::*;
pub use status::{Code, Status};

pub struct TaskService {
    engine: Arc<TaskEngine>,
}

impl TaskService {
    pub fn new(engine: Arc<TaskEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<TaskEngine> {
        &self.engine
    }

    /// Runs one RPC inside its own span and logs the outcome
    fn call<T>(
        &self,
        rpc: &'static str,
        ctx: &RequestContext,
        f: impl FnOnce() -> EngineResult<T>,
    ) -> Result<T, Status> {
        let span = info_span!("rpc", rpc, request_id = %ctx.request_id);
        let _enter = span.enter();
        let started = Instant::now();
        info!("rpc_start");

        let result = ctx
            .check()
            .map_err(EngineError::storage(rpc))
            .and_then(|()| f());
        let duration_ms = duration_ms(started.elapsed());

        match result {
            Ok(value) => {
                info!(duration_ms, "rpc_success");
                Ok(value)
            }
            Err(err) => {
                let status = Status::from(&err);
                match status.code {
                    Code::Internal => error!(duration_ms, code = %status.code, error = %err, "rpc_failed"),
                    _ => warn!(duration_ms, code = %status.code, error = %err, "rpc_failed"),
                }
                Err(status)
            }
        }
    }

    fn resolve(&self, ctx: &RequestContext, raw: &str) -> EngineResult<TaskId> {
        self.engine.resolve_task_id(ctx, raw, None)
    }

    fn resolve_all(&self, ctx: &RequestContext, raw: &[String]) -> EngineResult<Vec<TaskId>> {
        raw.iter().map(|r| self.resolve(ctx, r)).collect()
    }

    fn user_or_default(&self, raw: &str) -> EngineResult<UserId> {
        let raw = if raw.trim().is_empty() {
            self.engine.policy().default_user.as_str()
        } else {
            raw
        };
        Ok(raw.parse()?)
    }

    fn optional_user(raw: Option<&str>) -> EngineResult<Option<UserId>> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    pub fn add_task(&self, ctx: &RequestContext, req: AddTaskRequest) -> Result<TaskResponse, Status> {
        self.call("AddTask", ctx, || {
            let user = self.user_or_default(&req.user_id)?;
            let task = self.engine.add_task(ctx, &req.name, &req.description, user)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn move_to_staging(
        &self,
        ctx: &RequestContext,
        req: MoveToStagingRequest,
    ) -> Result<TaskResponse, Status> {
        self.call("MoveToStaging", ctx, || {
            let source = self.resolve(ctx, &req.source_id)?;
            let destination_id = match req.destination_id.as_deref().map(str::trim) {
                Some(raw) if !raw.is_empty() => Some(self.resolve(ctx, raw)?),
                _ => None,
            };
            let destination = Destination::from_parts(destination_id, req.new_location)?;
            let points = (!req.points.is_empty()).then_some(req.points);
            let task = self
                .engine
                .move_to_staging(ctx, &source, destination, points, req.tags)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn start_task(&self, ctx: &RequestContext, req: TaskIdRequest) -> Result<TaskResponse, Status> {
        self.call("StartTask", ctx, || {
            let id = self.resolve(ctx, &req.id)?;
            let task = self.engine.start_task(ctx, &id)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn stop_task(&self, ctx: &RequestContext, req: StopTaskRequest) -> Result<StopTaskResponse, Status> {
        self.call("StopTask", ctx, || {
            let id = self.resolve(ctx, &req.id)?;
            let (task, completed) = self.engine.stop_task(ctx, &id, req.points_completed)?;
            Ok(StopTaskResponse { task, completed })
        })
    }

    pub fn complete_task(&self, ctx: &RequestContext, req: TaskIdRequest) -> Result<TaskResponse, Status> {
        self.call("CompleteTask", ctx, || {
            let id = self.resolve(ctx, &req.id)?;
            let task = self.engine.complete_task(ctx, &id)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn merge_tasks(&self, ctx: &RequestContext, req: MergeTasksRequest) -> Result<TaskResponse, Status> {
        self.call("MergeTasks", ctx, || {
            let from = self.resolve(ctx, &req.from_id)?;
            let to = self.resolve(ctx, &req.to_id)?;
            let task = self.engine.merge_tasks(ctx, &from, &to)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn split_task(&self, ctx: &RequestContext, req: SplitTaskRequest) -> Result<TasksResponse, Status> {
        self.call("SplitTask", ctx, || {
            let id = self.resolve(ctx, &req.id)?;
            let tasks = self
                .engine
                .split_task(ctx, &id, &req.new_names, &req.new_descriptions)?;
            Ok(TasksResponse { tasks })
        })
    }

    pub fn advertise_task(
        &self,
        ctx: &RequestContext,
        req: AdvertiseTaskRequest,
    ) -> Result<TaskResponse, Status> {
        self.call("AdvertiseTask", ctx, || {
            let id = self.resolve(ctx, &req.id)?;
            let targets = self.resolve_all(ctx, &req.target_ids)?;
            let task = self.engine.advertise_task(ctx, &id, &targets)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn stitch_tasks(&self, ctx: &RequestContext, req: StitchTasksRequest) -> Result<TasksResponse, Status> {
        self.call("StitchTasks", ctx, || {
            let sources = self.resolve_all(ctx, &req.source_ids)?;
            let target = self.resolve(ctx, &req.target_id)?;
            let tasks = self.engine.stitch_tasks(ctx, &sources, &target)?;
            Ok(TasksResponse { tasks })
        })
    }

    pub fn list_tasks(&self, ctx: &RequestContext, req: ListTasksRequest) -> Result<TasksResponse, Status> {
        self.call("ListTasks", ctx, || {
            let user = Self::optional_user(req.user_id.as_deref())?;
            let tasks = self.engine.list_tasks(ctx, req.stage, user.as_ref())?;
            Ok(TasksResponse { tasks })
        })
    }

    pub fn get_task(&self, ctx: &RequestContext, req: TaskIdRequest) -> Result<TaskResponse, Status> {
        self.call("GetTask", ctx, || {
            let id = self.resolve(ctx, &req.id)?;
            let task = self.engine.get_task(ctx, &id)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn get_task_dag(
        &self,
        ctx: &RequestContext,
        req: GetTaskDagRequest,
    ) -> Result<GetTaskDagResponse, Status> {
        self.call("GetTaskDAG", ctx, || {
            let user = Self::optional_user(req.user_id.as_deref())?;
            let view = self.engine.get_task_dag(ctx, user.as_ref())?;
            let rendered = view.render();
            let nodes = view
                .tasks
                .into_iter()
                .map(|task| {
                    let short_id = view
                        .prefixes
                        .get(&task.id)
                        .cloned()
                        .unwrap_or_else(|| task.id.to_string());
                    DagNode { task, short_id }
                })
                .collect();
            Ok(GetTaskDagResponse { nodes, rendered })
        })
    }

    pub fn update_task_tags(
        &self,
        ctx: &RequestContext,
        req: UpdateTaskTagsRequest,
    ) -> Result<TaskResponse, Status> {
        self.call("UpdateTaskTags", ctx, || {
            let id = self.resolve(ctx, &req.id)?;
            let task = self.engine.update_task_tags(ctx, &id, req.tags)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn set_due_date(&self, ctx: &RequestContext, req: SetDueDateRequest) -> Result<TaskResponse, Status> {
        self.call("SetDueDate", ctx, || {
            let id = self.resolve(ctx, &req.id)?;
            let task = self.engine.set_due_date(ctx, &id, req.due)?;
            Ok(TaskResponse { task })
        })
    }

    pub fn resolve_task_id(
        &self,
        ctx: &RequestContext,
        req: ResolveTaskIdRequest,
    ) -> Result<ResolveTaskIdResponse, Status> {
        self.call("ResolveTaskID", ctx, || {
            let user = Self::optional_user(req.user_id.as_deref())?;
            let id = self
                .engine
                .resolve_task_id(ctx, &req.partial_id, user.as_ref())?;
            Ok(ResolveTaskIdResponse { id: id.to_string() })
        })
    }

    pub fn check_integrity(&self, ctx: &RequestContext) -> Result<IntegrityReport, Status> {
        self.call("CheckIntegrity", ctx, || {
            let violations: Vec<String> = self
                .engine
                .check_integrity(ctx)?
                .iter()
                .map(ToString::to_string)
                .collect();
            Ok(IntegrityReport {
                healthy: violations.is_empty(),
                violations,
            })
        })
    }
}
