use std::sync::Arc;
use chrono::{DateTime, Local};
use log::{error, info};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::config::WorkerConfig;
use crate::error::{TaskError, TaskFailure};
use crate::ffmpeg::FFmpegSupervisor;
use crate::heartbeat::HeartbeatSink;
use crate::orchestrator::{Activity, AttemptContext, Orchestrator};
use crate::task::{TaskParameters, TaskResult};

/// One encoder run per attempt, always with the same parameters
pub struct TranscodeActivity {
    pub supervisor: FFmpegSupervisor,
    pub params: TaskParameters,
}

impl Activity for TranscodeActivity {
    async fn execute(&self, ctx: AttemptContext) -> Result<TaskResult, TaskError> {
        if ctx.attempt > 1 {
            info!("Retrying FFmpeg processing (attempt {}): {}", ctx.attempt, self.params.source_path.display());
        }
        self.supervisor.run(&self.params, ctx.heartbeat, &ctx.cancel).await
    }
}

/// Identity of one workflow run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: Uuid,
}

impl WorkflowExecution {
    /// Use `workflow_id` if given, otherwise derive one from the current time
    pub fn new(workflow_id: Option<String>) -> Self {
        Self {
            workflow_id: workflow_id.unwrap_or_else(|| default_workflow_id(Local::now())),
            run_id: Uuid::new_v4(),
        }
    }
}

/// `video-processing-YYYYMMDD-HHMMSS`
pub fn default_workflow_id(at: DateTime<Local>) -> String {
    format!("video-processing-{}", at.format("%Y%m%d-%H%M%S"))
}

/// Transcode one video under the configured timeout, heartbeat and retry policy.
///
/// `observer` receives every heartbeat of every attempt. Failures are returned
/// to the caller once retries are exhausted or the failure is not retryable.
pub async fn process_video(
    cfg: &WorkerConfig,
    execution: &WorkflowExecution,
    params: TaskParameters,
    observer: Option<Arc<dyn HeartbeatSink>>,
    cancel: &CancellationToken,
) -> Result<TaskResult, TaskFailure> {
    info!("Starting video processing workflow {} (run {}) on {}: {} -> {}",
          execution.workflow_id, execution.run_id, cfg.task_queue,
          params.source_path.display(), params.destination_path.display());

    if let Err(error) = params.validate() {
        error!("Rejected workflow {}: {}", execution.workflow_id, error);
        return Err(TaskFailure {
            error,
            attempts: 0,
            last_percent: None,
        });
    }

    let options = cfg.activity_options().map_err(|e| TaskFailure {
        error: TaskError::InvalidParameters(format!("invalid worker configuration: {}", e)),
        attempts: 0,
        last_percent: None,
    })?;

    let mut orchestrator = Orchestrator::new(options).map_err(|e| TaskFailure {
        error: TaskError::InvalidParameters(format!("invalid activity options: {}", e)),
        attempts: 0,
        last_percent: None,
    })?;
    if let Some(observer) = observer {
        orchestrator = orchestrator.with_observer(observer);
    }

    let activity = TranscodeActivity {
        supervisor: FFmpegSupervisor::new(cfg),
        params,
    };

    match orchestrator.execute(&activity, cancel).await {
        Ok(result) => {
            info!("✅ Video processing completed: processing time {:?}, video length {}ms",
                  result.processing_time, result.duration_ms);
            Ok(result)
        }
        Err(failure) => {
            error!("FFmpeg processing failed for workflow {}: {}", execution.workflow_id, failure);
            Err(failure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_workflow_id_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(default_workflow_id(at), "video-processing-20240309-070501");
    }

    #[test]
    fn test_explicit_workflow_id_is_kept() {
        let a = WorkflowExecution::new(Some("nightly-batch".to_string()));
        let b = WorkflowExecution::new(Some("nightly-batch".to_string()));
        assert_eq!(a.workflow_id, "nightly-batch");
        assert_ne!(a.run_id, b.run_id);

        let generated = WorkflowExecution::new(None);
        assert!(generated.workflow_id.starts_with("video-processing-"));
    }

    #[tokio::test]
    async fn test_empty_destination_is_rejected_before_running() {
        let failure = process_video(
            &WorkerConfig::default(),
            &WorkflowExecution::new(None),
            TaskParameters::new("/media/in.mkv", "", vec![]),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(failure.error, TaskError::InvalidParameters(_)));
        assert_eq!(failure.attempts, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_retries_failing_encoder_until_attempts_run_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let bin = dir.path().join("flaky-ffmpeg");
        std::fs::write(
            &bin,
            format!(
                "#!/bin/sh\necho run >> '{}'\necho 'Duration: 00:00:10.00, start: 0.0' >&2\necho 'time=00:00:03.00' >&2\nexit 1\n",
                counter.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cfg = WorkerConfig {
            encoder_bin: bin,
            heartbeat_interval_secs: 1,
            retry: crate::config::RetryConfig {
                initial_interval_ms: 10,
                maximum_interval_secs: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        let failure = process_video(
            &cfg,
            &WorkflowExecution::new(None),
            TaskParameters::new("/media/in.mkv", "/media/out.mkv", vec![]),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.error, TaskError::ProcessExecution { code: Some(1), .. }));
        assert_eq!(failure.last_percent, Some(30.0));

        let runs = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(runs.lines().count(), 3, "exactly three encoder runs");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_to_close_timeout_kills_every_attempt() {
        use std::os::unix::fs::PermissionsExt;
        use std::process::{Command, Stdio};
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pids");
        let bin = dir.path().join("stuck-ffmpeg");
        std::fs::write(
            &bin,
            format!(
                "#!/bin/sh\necho $$ >> '{}'\necho 'Duration: 00:10:00.00, start: 0.0' >&2\nexec sleep 30\n",
                pid_file.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cfg = WorkerConfig {
            encoder_bin: bin,
            heartbeat_interval_secs: 1,
            heartbeat_timeout_secs: 2,
            start_to_close_timeout_secs: 3,
            retry: crate::config::RetryConfig {
                initial_interval_ms: 10,
                maximum_interval_secs: 1,
                maximum_attempts: 2,
                ..Default::default()
            },
            ..Default::default()
        };

        let failure = process_video(
            &cfg,
            &WorkflowExecution::new(None),
            TaskParameters::new("/media/in.mkv", "/media/out.mkv", vec![]),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 2);
        assert!(matches!(failure.error, TaskError::StartToCloseTimeout(d) if d == Duration::from_secs(3)));

        let pids: Vec<u32> = std::fs::read_to_string(&pid_file)
            .unwrap()
            .lines()
            .map(|l| l.trim().parse().unwrap())
            .collect();
        assert_eq!(pids.len(), 2, "one encoder process per attempt");
        for pid in pids {
            let alive = Command::new("kill")
                .args(["-0", &pid.to_string()])
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false);
            assert!(!alive, "encoder process {} outlived its attempt", pid);
        }
    }
}
