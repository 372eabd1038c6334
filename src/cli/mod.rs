//! # Command-Line Interface
//!
//! Thin driver over [`TaskService`](crate::service::TaskService) for a
//! `.tasker/` workspace.
//!
//! ## Commands
//!
//! | Group | Commands |
//! |-------|----------|
//! | Setup | `init` |
//! | Lifecycle | `add`, `stage`, `start`, `stop`, `complete` |
//! | Graph | `merge`, `split`, `advertise`, `stitch` |
//! | Metadata | `tag`, `due` |
//! | Queries | `list`, `show`, `dag`, `check` |
//! | Users | `user add`, `user list`, `remind` |
//!
//! ## Output Formats
//!
//! All commands support the `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! Task IDs may be abbreviated to any unique prefix.

mod app;
mod output;
mod task;
mod user;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
