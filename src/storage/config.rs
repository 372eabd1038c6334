//! Configuration handling
//!
//! Configuration is stored in `.tasker/config.toml` (workspace) and
//! `config.toml` under the platform config directory (global).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WORKSPACE_DIR: &str = ".tasker";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Which side wins when both merged tasks carry the same tag key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TagCollision {
    #[default]
    KeepDestination,
    TakeSource,
}

/// Engine policy knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of tasks allowed in the inbox
    pub max_inbox_size: usize,

    /// Treat tasks without declared points as complete when stopped
    pub zero_point_tasks_complete: bool,

    pub merge_tag_collision: TagCollision,

    /// Owner used when a request names no user
    pub default_user: String,

    /// Retries for structural operations that lose a version race
    pub structural_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inbox_size: 5,
            zero_point_tasks_complete: true,
            merge_tag_collision: TagCollision::KeepDestination,
            default_user: "default-user".to_string(),
            structural_retries: 3,
        }
    }
}

/// Best-effort background work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Upper bound for a single notification or calendar call
    pub timeout_ms: u64,

    /// Period of the due-date reminder sweep
    pub reminder_interval_secs: u64,

    /// Push started tasks to the calendar collaborator
    pub calendar_sync: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            reminder_interval_secs: 3_600,
            calendar_sync: true,
        }
    }
}

impl BackgroundConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Workspace-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub engine: EngineConfig,
    pub background: BackgroundConfig,
    pub logging: LoggingConfig,
}

impl WorkspaceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.default_user.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "engine.default_user must not be empty".to_string(),
            ));
        }
        if self.background.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "background.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.background.reminder_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "background.reminder_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Global user configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default output format (text or json)
    pub default_format: OutputFormat,
}

/// Combined configuration (global + workspace)
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub global: GlobalConfig,
    pub workspace_root: Option<PathBuf>,
}

impl Config {
    /// Loads configuration for a specific workspace
    pub fn for_workspace(root: &Path) -> Result<Self> {
        let global = Self::load_global()?;
        let workspace = Self::load_workspace_config(root)?;

        Ok(Self {
            workspace,
            global,
            workspace_root: Some(root.to_path_buf()),
        })
    }

    /// Global config only, for commands that run outside a workspace
    pub fn global_only() -> Result<Self> {
        Ok(Self {
            workspace: WorkspaceConfig::default(),
            global: Self::load_global()?,
            workspace_root: None,
        })
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "tasker", "tasker").map(|dirs| dirs.config_dir().to_path_buf())
    }

    fn load_global() -> Result<GlobalConfig> {
        let config_dir = match Self::global_config_dir() {
            Some(dir) => dir,
            None => return Ok(GlobalConfig::default()),
        };

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            return Ok(GlobalConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read global config: {}", config_path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse global config")
    }

    /// Loads and validates workspace configuration from a specific root
    pub fn load_workspace_config(root: &Path) -> Result<WorkspaceConfig> {
        let config_path = root.join(WORKSPACE_DIR).join("config.toml");

        if !config_path.exists() {
            return Ok(WorkspaceConfig::default());
        }

        let content = fs::read_to_string(&config_path).with_context(|| {
            format!("Failed to read workspace config: {}", config_path.display())
        })?;

        let config: WorkspaceConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse workspace config")?;

        config
            .validate()
            .with_context(|| format!("Invalid workspace config: {}", config_path.display()))?;

        Ok(config)
    }

    /// Finds the workspace root by walking up from `start` looking for `.tasker/`
    pub fn find_workspace_root_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            if current.join(WORKSPACE_DIR).is_dir() {
                return Some(current);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Finds the workspace root starting at the current directory
    pub fn find_workspace_root() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        Self::find_workspace_root_from(&cwd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = WorkspaceConfig::default();
        assert_eq!(config.engine.max_inbox_size, 5);
        assert!(config.engine.zero_point_tasks_complete);
        assert_eq!(config.engine.merge_tag_collision, TagCollision::KeepDestination);
        assert_eq!(config.background.timeout(), Duration::from_secs(5));
        assert_eq!(config.background.reminder_interval(), Duration::from_secs(3600));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_workspace_config() {
        let toml = r#"
[engine]
max_inbox_size = 2
merge_tag_collision = "take_source"

[background]
calendar_sync = false
"#;

        let config: WorkspaceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.engine.max_inbox_size, 2);
        assert_eq!(config.engine.merge_tag_collision, TagCollision::TakeSource);
        assert_eq!(config.engine.default_user, "default-user");
        assert!(!config.background.calendar_sync);
        assert_eq!(config.background.timeout_ms, 5_000);
    }

    #[test]
    fn parse_global_config() {
        let config: GlobalConfig = toml::from_str(r#"default_format = "json""#).unwrap();
        assert_eq!(config.default_format, OutputFormat::Json);
    }

    #[test]
    fn invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(WORKSPACE_DIR)).unwrap();
        fs::write(
            dir.path().join(WORKSPACE_DIR).join("config.toml"),
            "[background]\ntimeout_ms = 0\n",
        )
        .unwrap();

        let err = Config::load_workspace_config(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("timeout_ms"));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(WORKSPACE_DIR)).unwrap();
        fs::write(dir.path().join(WORKSPACE_DIR).join("config.toml"), "[engine\n").unwrap();

        assert!(Config::load_workspace_config(dir.path()).is_err());
    }

    #[test]
    fn find_workspace_root_walks_up() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(WORKSPACE_DIR)).unwrap();
        let sub_dir = dir.path().join("sub").join("dir");
        fs::create_dir_all(&sub_dir).unwrap();

        let root = Config::find_workspace_root_from(&sub_dir);
        assert_eq!(root.as_deref(), Some(dir.path()));
    }
}
