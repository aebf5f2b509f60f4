use crate::exec::ExecutionResult;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskactError {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("unknown action name: {0}")]
    UnknownAction(String),

    #[error("invalid sort spec '{spec}': {reason}")]
    InvalidSortSpec { spec: String, reason: String },

    #[error("{count} candidates matched and multiple-match policy is 'fail'")]
    MultipleMatches { count: usize },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
        result: Box<ExecutionResult>,
    },

    #[error("command `{command}` exited with code {code}")]
    CommandFailed {
        command: String,
        code: i32,
        result: Box<ExecutionResult>,
    },

    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
        result: Box<ExecutionResult>,
    },

    #[error("command `{command}` failed after {attempts} attempts")]
    RetryExhausted {
        command: String,
        attempts: u32,
        result: Box<ExecutionResult>,
    },

    #[error("interrupted")]
    Cancelled,

    #[error("builtin '{name}': {message}")]
    Builtin { name: String, message: String },

    #[error("task export produced invalid JSON: {0}")]
    TaskExport(#[source] serde_json::Error),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl TaskactError {
    /// Execution diagnostics attached to the error, when the failure came
    /// out of the executor.
    pub fn execution_result(&self) -> Option<&ExecutionResult> {
        match self {
            TaskactError::Spawn { result, .. }
            | TaskactError::CommandFailed { result, .. }
            | TaskactError::Timeout { result, .. }
            | TaskactError::RetryExhausted { result, .. } => Some(result),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskactError>;
