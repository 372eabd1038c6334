//! Tasker - task pipeline with dependency tracking

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = tasker::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
