pub mod executor;
pub mod limits;
pub mod process;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use executor::CommandExecutor;
pub use limits::{ExecLimit, ExecutionPreferences};
pub use process::{ProcessRunner, RunnerError};

/// One command to run in the sandbox: argv, working directory and
/// extra environment variables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Command {
    pub argv: Vec<String>,
    pub dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl Command {
    pub fn new(argv: Vec<String>, dir: PathBuf) -> Self {
        Self {
            argv,
            dir,
            env: Vec::new(),
        }
    }
}

/// How a sandboxed process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Exited normally with an exit code.
    Exited,
    /// Killed because it exceeded the wall-clock or CPU-time ceiling.
    TimedOut,
    /// Killed by a signal other than the CPU-limit ones.
    KilledBySignal,
    /// The process could not be started at all.
    CouldNotStart,
}

/// Result of running one sandboxed command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub status_message: String,
}

impl CommandResult {
    pub fn abnormal(status: ProcessStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            exit_code: None,
            signal: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            status_message: message.into(),
        }
    }

    pub fn exited(exit_code: i32, stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self {
            status: ProcessStatus::Exited,
            exit_code: Some(exit_code),
            signal: None,
            stdout,
            stderr,
            status_message: format!("exited with code {}", exit_code),
        }
    }
}
