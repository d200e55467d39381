//! Orchestration policy applied around one logical transcoding task.
//!
//! These types carry no runtime state. A hosting orchestrator (see
//! [`crate::orchestrator`]) enforces them across attempts.

use std::time::Duration;
use thiserror::Error;

/// Invalid policy or worker configuration values
#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("backoff coefficient must be >= 1.0, got {0}")]
    BackoffCoefficient(f64),
    #[error("maximum interval {maximum:?} is shorter than initial interval {initial:?}")]
    MaximumInterval { initial: Duration, maximum: Duration },
    #[error("maximum attempts must be at least 1")]
    ZeroAttempts,
    #[error("start-to-close timeout must be greater than zero")]
    ZeroStartToClose,
    #[error("heartbeat timeout must be greater than zero")]
    ZeroHeartbeatTimeout,
    #[error("heartbeat timeout {heartbeat:?} must be shorter than start-to-close timeout {overall:?}")]
    HeartbeatTimeoutTooLong { heartbeat: Duration, overall: Duration },
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeatInterval,
    #[error("heartbeat interval {interval:?} must be shorter than heartbeat timeout {timeout:?}")]
    HeartbeatIntervalTooLong { interval: Duration, timeout: Duration },
    #[error("diagnostic byte cap must be greater than zero")]
    ZeroDiagnosticCap,
}

/// Exponential backoff schedule between attempts of the same task
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Factor applied to the delay after each retry
    pub backoff_coefficient: f64,
    /// Upper bound for any single delay
    pub maximum_interval: Duration,
    /// Total number of attempts, including the first one
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(10 * 60),
            maximum_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.backoff_coefficient.is_nan() || self.backoff_coefficient < 1.0 {
            return Err(PolicyError::BackoffCoefficient(self.backoff_coefficient));
        }
        if self.maximum_interval < self.initial_interval {
            return Err(PolicyError::MaximumInterval {
                initial: self.initial_interval,
                maximum: self.maximum_interval,
            });
        }
        if self.maximum_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        Ok(())
    }

    /// Delay to wait before retry number `retry` (1-based).
    ///
    /// `initial * coefficient^(retry - 1)`, capped at `maximum_interval`.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.maximum_interval)
            .min(self.maximum_interval)
    }

    /// Whether another attempt may start after `attempts_made` attempts have failed
    pub fn allows_another_attempt(&self, attempts_made: u32) -> bool {
        attempts_made < self.maximum_attempts
    }

    /// Every inter-attempt delay the policy can produce, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.maximum_attempts)
            .map(|retry| self.delay_before_retry(retry))
            .collect()
    }
}

/// Timeouts a hosting orchestrator enforces on each attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionDeadlines {
    /// Maximum wall-clock time for one attempt
    pub start_to_close_timeout: Duration,
    /// Maximum silence between liveness signals before the attempt is considered dead
    pub heartbeat_timeout: Duration,
}

impl Default for ExecutionDeadlines {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(2 * 60 * 60),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

impl ExecutionDeadlines {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.start_to_close_timeout.is_zero() {
            return Err(PolicyError::ZeroStartToClose);
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(PolicyError::ZeroHeartbeatTimeout);
        }
        if self.heartbeat_timeout >= self.start_to_close_timeout {
            return Err(PolicyError::HeartbeatTimeoutTooLong {
                heartbeat: self.heartbeat_timeout,
                overall: self.start_to_close_timeout,
            });
        }
        Ok(())
    }
}

/// Deadlines and retry policy supplied once per logical task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityOptions {
    pub deadlines: ExecutionDeadlines,
    pub retry_policy: RetryPolicy,
}

impl ActivityOptions {
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.deadlines.validate()?;
        self.retry_policy.validate()
    }
}
