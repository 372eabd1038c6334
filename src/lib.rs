//! Tasker - a task pipeline with a dependency graph
//!
//! Tasks move from an inbox through staging into active work and are
//! linked into a directed acyclic graph of predecessors and successors.
//! The [`engine`] keeps that graph reciprocal and acyclic under
//! concurrent edits; [`service`] exposes it as request/response calls.

pub mod cli;
pub mod domain;
pub mod engine;
pub mod logging;
pub mod service;
pub mod storage;

pub use domain::{Stage, Task, TaskId, TaskStatus, UserId};
pub use engine::{EngineError, TaskEngine};
pub use service::TaskService;
