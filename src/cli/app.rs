//! Main CLI application structure

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use super::output::{Output, OutputFormat};
use super::task::{self, Session, TaskCommands};
use super::user::{self, UserCommands};
use crate::logging::{init_logging, LogLevel};
use crate::storage::{Config, Workspace};

#[derive(Parser)]
#[command(name = "tasker")]
#[command(author, version, about = "Task pipeline with dependency tracking")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the global config, then text)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Log level (overrides TASKER_LOG and the workspace config)
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new tasker workspace
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    #[command(flatten)]
    Task(TaskCommands),

    /// Manage the user directory
    #[command(subcommand)]
    User(UserCommands),

    /// Send due-date reminders once
    Remind,
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::find_workspace_root() {
        Some(root) => Config::for_workspace(&root).ok(),
        None => Config::global_only().ok(),
    };
    init_logging(
        cli.log_level,
        config.as_ref().map(|c| c.workspace.logging.level.as_str()),
    )?;

    let format = cli
        .format
        .or_else(|| config.as_ref().map(|c| c.global.default_format.into()))
        .unwrap_or_default();
    let output = Output::new(format);

    if let Commands::Init { path } = &cli.command {
        let workspace = Workspace::init(path)?;
        debug!(dir = %workspace.dir().display(), "workspace created");
        output.success(&format!(
            "Initialized tasker workspace at {}",
            workspace.root().display()
        ));
        return Ok(());
    }

    let session = Session::open()?;
    let result = match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Task(cmd) => task::run(cmd, &session, &output),
        Commands::User(cmd) => user::run(cmd, &session, &output),
        Commands::Remind => user::remind(&session, &output),
    };
    session.finish();
    result
}
