use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::policy::{ActivityOptions, ExecutionDeadlines, PolicyError, RetryPolicy};

/// Default cap on diagnostic output read from the encoder (10 MiB)
pub const DEFAULT_MAX_DIAGNOSTIC_BYTES: u64 = 10 * 1024 * 1024;

/// Configuration for the transcoding worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Path to the encoder binary
    pub encoder_bin: PathBuf,
    /// Queue label carried in logs; tasks run in-process, nothing is polled
    pub task_queue: String,
    /// Maximum number of diagnostic bytes parsed per run; the rest is discarded
    pub max_diagnostic_bytes: u64,
    /// Period of the liveness reporter in seconds
    pub heartbeat_interval_secs: u64,
    /// Overall timeout for a single attempt in seconds
    pub start_to_close_timeout_secs: u64,
    /// Maximum silence between heartbeats in seconds
    pub heartbeat_timeout_secs: u64,
    /// Retry schedule applied across attempts
    pub retry: RetryConfig,
}

/// Retry schedule as it appears in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub maximum_interval_secs: u64,
    pub maximum_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1000,
            backoff_coefficient: 2.0,
            maximum_interval_secs: 600,
            maximum_attempts: 3,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl WorkerConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            encoder_bin: PathBuf::from("ffmpeg"),
            task_queue: "video-processing-task-queue".to_string(),
            max_diagnostic_bytes: DEFAULT_MAX_DIAGNOSTIC_BYTES,
            heartbeat_interval_secs: 5,
            start_to_close_timeout_secs: 2 * 60 * 60, // 2 hours
            heartbeat_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.activity_options()
            .context("Invalid worker configuration")?;

        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Build the orchestration options for tasks run with this configuration.
    ///
    /// Validates the retry and deadline invariants as well as the worker-side
    /// settings that depend on them.
    pub fn activity_options(&self) -> Result<ActivityOptions, PolicyError> {
        let options = ActivityOptions {
            deadlines: ExecutionDeadlines {
                start_to_close_timeout: Duration::from_secs(self.start_to_close_timeout_secs),
                heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            },
            retry_policy: RetryPolicy {
                initial_interval: Duration::from_millis(self.retry.initial_interval_ms),
                backoff_coefficient: self.retry.backoff_coefficient,
                maximum_interval: Duration::from_secs(self.retry.maximum_interval_secs),
                maximum_attempts: self.retry.maximum_attempts,
            },
        };
        options.validate()?;

        if self.max_diagnostic_bytes == 0 {
            return Err(PolicyError::ZeroDiagnosticCap);
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(PolicyError::ZeroHeartbeatInterval);
        }
        if self.heartbeat_interval() >= options.deadlines.heartbeat_timeout {
            return Err(PolicyError::HeartbeatIntervalTooLong {
                interval: self.heartbeat_interval(),
                timeout: options.deadlines.heartbeat_timeout,
            });
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_matches_documented_policy() {
        let cfg = WorkerConfig::default();
        let options = cfg.activity_options().unwrap();

        assert_eq!(cfg.encoder_bin, PathBuf::from("ffmpeg"));
        assert_eq!(cfg.max_diagnostic_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(options.deadlines.start_to_close_timeout, Duration::from_secs(7200));
        assert_eq!(options.deadlines.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(options.retry_policy.initial_interval, Duration::from_secs(1));
        assert_eq!(options.retry_policy.backoff_coefficient, 2.0);
        assert_eq!(options.retry_policy.maximum_interval, Duration::from_secs(600));
        assert_eq!(options.retry_policy.maximum_attempts, 3);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = WorkerConfig::load_config(Some(Path::new("/nonexistent/worker.toml"))).unwrap();
        assert_eq!(cfg.task_queue, "video-processing-task-queue");

        let cfg = WorkerConfig::load_config(None).unwrap();
        assert_eq!(cfg.heartbeat_timeout_secs, 30);
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "encoder_bin = \"/opt/ffmpeg/bin/ffmpeg\"").unwrap();
        writeln!(file, "heartbeat_timeout_secs = 60").unwrap();
        writeln!(file, "[retry]").unwrap();
        writeln!(file, "maximum_attempts = 5").unwrap();
        drop(file);

        let cfg = WorkerConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.encoder_bin, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(cfg.heartbeat_timeout_secs, 60);
        assert_eq!(cfg.retry.maximum_attempts, 5);
        // Untouched fields keep their defaults
        assert_eq!(cfg.retry.backoff_coefficient, 2.0);
        assert_eq!(cfg.heartbeat_interval_secs, 5);
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{"task_queue": "gpu-queue", "max_diagnostic_bytes": 4096}"#).unwrap();

        let cfg = WorkerConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.task_queue, "gpu-queue");
        assert_eq!(cfg.max_diagnostic_bytes, 4096);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{"heartbeat_timeout_secs": 7200}"#).unwrap();
        assert!(WorkerConfig::load_config(Some(&path)).is_err());

        let cfg = WorkerConfig {
            heartbeat_interval_secs: 30,
            ..Default::default()
        };
        assert!(matches!(
            cfg.activity_options(),
            Err(PolicyError::HeartbeatIntervalTooLong { .. })
        ));

        let cfg = WorkerConfig {
            max_diagnostic_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.activity_options(), Err(PolicyError::ZeroDiagnosticCap)));

        let cfg = WorkerConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.activity_options(), Err(PolicyError::ZeroHeartbeatInterval)));
    }
}
