//! Output formatting for CLI commands

use serde::Serialize;

use crate::domain::Task;
use crate::storage::OutputFormat as ConfiguredFormat;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl From<ConfiguredFormat> for OutputFormat {
    fn from(format: ConfiguredFormat) -> Self {
        match format {
            ConfiguredFormat::Text => OutputFormat::Text,
            ConfiguredFormat::Json => OutputFormat::Json,
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Prints a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "message": message
                    })
                );
            }
        }
    }

    /// Prints structured data
    pub fn data<T: Serialize>(&self, data: &T) {
        match self.format {
            OutputFormat::Text => {
                if let Ok(json) = serde_json::to_string_pretty(data) {
                    println!("{}", json);
                }
            }
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(data) {
                    println!("{}", json);
                }
            }
        }
    }

    /// Prints one task: the full record in JSON, a summary line in text
    pub fn task(&self, verb: &str, task: &Task) {
        if self.is_json() {
            self.data(task);
        } else {
            println!("{} {}: {} [{}/{}]", verb, task.id, task.name, task.stage, task.status);
        }
    }

    /// Returns true if using JSON format
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}
