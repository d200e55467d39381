use std::time::Duration;
use thiserror::Error;

/// Failure of a single task attempt
#[derive(Debug, Error)]
pub enum TaskError {
    /// The encoder could not be launched (binary missing, not executable, ...)
    #[error("failed to start {program}: {source}")]
    ProcessStart {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The encoder ran but did not exit cleanly
    #[error("encoder process failed: {detail}")]
    ProcessExecution { code: Option<i32>, detail: String },

    /// The caller gave up on the attempt; the process was terminated
    #[error("task was cancelled")]
    Cancelled,

    #[error("no heartbeat received within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("attempt exceeded start-to-close timeout of {0:?}")]
    StartToCloseTimeout(Duration),

    #[error("invalid task parameters: {0}")]
    InvalidParameters(String),
}

impl TaskError {
    /// Whether the orchestrator may schedule another attempt after this failure
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::ProcessStart { .. }
            | TaskError::ProcessExecution { .. }
            | TaskError::HeartbeatTimeout(_)
            | TaskError::StartToCloseTimeout(_) => true,
            TaskError::Cancelled | TaskError::InvalidParameters(_) => false,
        }
    }
}

/// Permanent failure of a logical task, surfaced to whoever submitted it
#[derive(Debug, Error)]
#[error("task failed after {attempts} attempt(s): {error}")]
pub struct TaskFailure {
    #[source]
    pub error: TaskError,
    pub attempts: u32,
    /// Last progress percentage seen in a heartbeat, if any arrived
    pub last_percent: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let start = TaskError::ProcessStart {
            program: "ffmpeg".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(start.is_retryable());
        assert!(TaskError::ProcessExecution { code: Some(1), detail: "exit status: 1".into() }.is_retryable());
        assert!(TaskError::HeartbeatTimeout(Duration::from_secs(30)).is_retryable());
        assert!(TaskError::StartToCloseTimeout(Duration::from_secs(7200)).is_retryable());

        assert!(!TaskError::Cancelled.is_retryable());
        assert!(!TaskError::InvalidParameters("empty source path".into()).is_retryable());
    }

    #[test]
    fn test_failure_message_includes_cause() {
        let failure = TaskFailure {
            error: TaskError::ProcessExecution { code: Some(1), detail: "exit status: 1".into() },
            attempts: 3,
            last_percent: Some(42.0),
        };
        let msg = failure.to_string();
        assert!(msg.contains("3 attempt(s)"), "{}", msg);
        assert!(msg.contains("exit status: 1"), "{}", msg);
    }
}
