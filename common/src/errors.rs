// Error handling framework

use crate::models::Cause;
use std::path::PathBuf;
use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No next execution time available for '{expression}'")]
    NoNextExecution { expression: String },
}

/// Errors reported by a process executor
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Command is empty")]
    InvalidCommand,

    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read process output: {0}")]
    Stream(#[source] std::io::Error),

    #[error("Execution timeout after {0} seconds")]
    Timeout(u64),
}

/// Script run errors
///
/// Cleanup failures are built for logging only; `ScriptRunner::run` never
/// returns them.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Unable to produce a script file: {0}")]
    Materialization(#[source] std::io::Error),

    #[error("Command execution failed: {source}")]
    Execution {
        #[source]
        source: ProcessError,
        /// Cause recovered from whatever output was captured before the failure
        cause: Cause,
    },

    #[error("Unable to delete script file {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScriptError {
    /// Short label used as a metrics dimension
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::Materialization(_) => "materialization",
            ScriptError::Execution { .. } => "execution",
            ScriptError::Cleanup { .. } => "cleanup",
        }
    }
}

/// Build trigger errors
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Build request failed: {0}")]
    Request(String),

    #[error("Build request rejected with HTTP status {status}")]
    Rejected { status: u16 },

    #[error("Invalid build trigger configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<reqwest::Error> for TriggerError {
    /// The request URL carries the remote trigger token and is left out
    fn from(err: reqwest::Error) -> Self {
        TriggerError::Request(err.without_url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_process_timeout_display() {
        let err = ProcessError::Timeout(300);
        assert!(err.to_string().contains("300 seconds"));
    }

    #[test]
    fn test_execution_error_keeps_partial_cause() {
        let err = ScriptError::Execution {
            source: ProcessError::Timeout(5),
            cause: Cause::new("half done"),
        };
        assert_eq!(err.kind(), "execution");
        match err {
            ScriptError::Execution { cause, .. } => assert_eq!(cause.as_str(), "half done"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_cleanup_error_names_path() {
        let err = ScriptError::Cleanup {
            path: PathBuf::from("/ws/dostrigger-1.bat"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
        };
        assert!(err.to_string().contains("dostrigger-1.bat"));
    }
}
