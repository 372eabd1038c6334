//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `TASKER_LOG` environment variable (e.g. "info", "debug")
//! 3. `logging.level` from the workspace config
//! 4. default to `info`
//!
//! Logs go to STDERR so stdout stays clean for command output.

use std::time::Duration;

use anyhow::Result;
use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::fmt;

pub const LOG_ENV: &str = "TASKER_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(cli_level: Option<LogLevel>, config_level: Option<&str>) -> Result<()> {
    let env_level = std::env::var(LOG_ENV).ok();
    let level = resolve_level(cli_level, env_level.as_deref(), config_level);

    // try_init so tests and repeated invocations don't panic
    let _ = fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}

fn resolve_level(cli: Option<LogLevel>, env: Option<&str>, config: Option<&str>) -> Level {
    cli.map(Level::from)
        .or_else(|| env.and_then(parse_level_str))
        .or_else(|| config.and_then(parse_level_str))
        .unwrap_or(Level::INFO)
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Milliseconds for a log field, saturating instead of truncating
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_env_and_config() {
        let level = resolve_level(Some(LogLevel::Trace), Some("warn"), Some("error"));
        assert_eq!(level, Level::TRACE);
    }

    #[test]
    fn env_beats_config() {
        assert_eq!(resolve_level(None, Some("debug"), Some("error")), Level::DEBUG);
    }

    #[test]
    fn unparsable_values_fall_through() {
        assert_eq!(resolve_level(None, Some("loud"), Some("warning")), Level::WARN);
        assert_eq!(resolve_level(None, None, Some("???")), Level::INFO);
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
