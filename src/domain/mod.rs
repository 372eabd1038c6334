//! Domain models for the task engine
//!
//! Contains the entities and pure invariant checks without any I/O concerns.

pub mod dag;
pub mod graph;
mod id;
pub mod reminder;
mod task;
mod user;

pub use dag::DagError;
pub use graph::{DependencyGraph, GraphError, IntegrityViolation, TaskMap};
pub use id::{minimum_unique_prefix, resolve_prefix, IdError, TaskId, UserId};
pub use reminder::Reminder;
pub use task::{
    Flows, GeoLocation, Point, Schedule, Stage, StatusUpdate, TagValue, Tags, Task, TaskStatus,
    TransitionError, WorkInterval,
};
pub use user::{NotificationKind, NotificationSetting, User};
