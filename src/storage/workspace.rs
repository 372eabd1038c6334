//! Workspace management
//!
//! A workspace is a directory containing `.tasker/`, which holds the task
//! store, an optional user directory and the workspace config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use super::config::{Config, WORKSPACE_DIR};
use super::jsonl::{JsonlTaskRepository, JsonlUserRepository};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("Not in a tasker workspace. Run 'tasker init' first.")]
    NotInWorkspace,
}

const DEFAULT_CONFIG: &str = r#"# tasker workspace configuration

[engine]
# Maximum number of tasks allowed in the inbox
max_inbox_size = 5
# Tasks with no declared points complete as soon as they are stopped
zero_point_tasks_complete = true
# On merge, which task's tag wins a key collision: keep_destination | take_source
merge_tag_collision = "keep_destination"
default_user = "default-user"

[background]
timeout_ms = 5000
reminder_interval_secs = 3600
calendar_sync = true

[logging]
level = "info"
"#;

/// A tasker workspace
pub struct Workspace {
    root: PathBuf,
    config: Config,
}

impl Workspace {
    /// Opens an existing workspace at the given path
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.join(WORKSPACE_DIR).is_dir() {
            return Err(WorkspaceError::NotInWorkspace.into());
        }

        let config = Config::for_workspace(&root)?;

        Ok(Self { root, config })
    }

    /// Opens the workspace at the current directory or a parent
    pub fn open_current() -> Result<Self> {
        let root = Config::find_workspace_root().ok_or(WorkspaceError::NotInWorkspace)?;

        Self::open(root)
    }

    /// Initializes a new workspace at the given path
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let dir = root.join(WORKSPACE_DIR);

        if dir.is_dir() {
            return Err(WorkspaceError::AlreadyExists(root).into());
        }

        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}: {}", WORKSPACE_DIR, dir.display()))?;

        let config_path = dir.join("config.toml");
        fs::write(&config_path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

        let gitignore_path = dir.join(".gitignore");
        fs::write(&gitignore_path, "*.lock\n*.tmp\n").with_context(|| {
            format!("Failed to write .gitignore: {}", gitignore_path.display())
        })?;

        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn task_repository(&self) -> JsonlTaskRepository {
        JsonlTaskRepository::new(self.dir().join("tasks.jsonl"))
    }

    /// The user directory, if the workspace has one
    pub fn user_repository(&self) -> Option<JsonlUserRepository> {
        let path = self.users_path();
        path.exists().then(|| JsonlUserRepository::new(path))
    }

    /// The user directory for writing, created on first upsert
    pub fn user_directory(&self) -> JsonlUserRepository {
        JsonlUserRepository::new(self.users_path())
    }

    fn users_path(&self) -> PathBuf {
        self.dir().join("users.jsonl")
    }
}
