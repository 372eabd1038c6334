//! # Storage Layer
//!
//! Repository contracts and their implementations.
//!
//! ## Storage Formats
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Tasks | JSONL (one JSON per line) | `.tasker/tasks.jsonl` |
//! | Users | JSONL, optional | `.tasker/users.jsonl` |
//! | Config | TOML | `.tasker/config.toml` |
//!
//! ## Concurrency Safety
//!
//! - Every task carries a `version`; stale writes are rejected
//! - [`JsonlTaskRepository`] holds an `fs2` lock across read-check-write
//! - All file writes are atomic (temp file + rename)

pub mod config;
mod jsonl;
mod memory;
mod repository;
mod workspace;

pub use config::{Config, ConfigError, OutputFormat, TagCollision, WorkspaceConfig};
pub use jsonl::{JsonlFile, JsonlTaskRepository, JsonlUserRepository, Keyed};
pub use memory::{MemoryTaskRepository, MemoryUserRepository};
pub use repository::{
    ChangeSet, RequestContext, StoreError, TaskRepository, UserRepository,
};
pub use workspace::{Workspace, WorkspaceError};
