//! Engine error taxonomy

use thiserror::Error;

use crate::domain::{DagError, GraphError, IdError, Stage, TaskId, TransitionError};
use crate::storage::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing input; never worth retrying
    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Task {id} is in stage {stage}: {reason}")]
    InvalidState {
        id: TaskId,
        stage: Stage,
        reason: String,
    },

    #[error("Task {task} depends on {dependency}, which is not completed")]
    DependencyNotSatisfied { task: TaskId, dependency: TaskId },

    #[error("Edge {from} -> {to} would create a cycle")]
    Cycle { from: TaskId, to: TaskId },

    #[error("Cannot merge {from} into {to}: tasks are on different chains")]
    ChainMismatch { from: TaskId, to: TaskId },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A graph invariant is already broken in storage
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Lost an optimistic version race
    #[error("Concurrent modification of task {0}")]
    Conflict(TaskId),

    #[error("{op} failed: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn task_not_found(id: &TaskId) -> Self {
        Self::NotFound {
            kind: "task",
            id: id.to_string(),
        }
    }

    /// Wraps a storage error with the name of the operation that hit it.
    ///
    /// Not-found and version conflicts keep their own variants.
    pub fn storage(op: &'static str) -> impl FnOnce(StoreError) -> EngineError {
        move |source| match source {
            StoreError::NotFound { kind, id } => EngineError::NotFound { kind, id },
            StoreError::Conflict { id, .. } => EngineError::Conflict(id),
            source => EngineError::Storage { op, source },
        }
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            EngineError::Storage {
                source: StoreError::DeadlineExceeded,
                ..
            }
        )
    }
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        EngineError::InvalidState {
            id: err.task,
            stage: err.stage,
            reason: err.reason.to_string(),
        }
    }
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CycleDetected(from, to) => EngineError::Cycle { from, to },
            GraphError::SelfDependency(id) => EngineError::Cycle {
                from: id.clone(),
                to: id,
            },
            GraphError::TaskNotFound(id) => EngineError::task_not_found(&id),
        }
    }
}

impl From<DagError> for EngineError {
    fn from(err: DagError) -> Self {
        EngineError::Integrity(err.to_string())
    }
}

impl From<IdError> for EngineError {
    fn from(err: IdError) -> Self {
        match err {
            IdError::NoMatch(partial) => EngineError::NotFound {
                kind: "task",
                id: partial,
            },
            other => EngineError::Validation(other.to_string()),
        }
    }
}
