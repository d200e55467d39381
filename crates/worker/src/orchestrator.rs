//! In-process host for long-running activities.
//!
//! Applies [`ActivityOptions`] around an [`Activity`]: every attempt is bounded
//! by the start-to-close and heartbeat timeouts, and retryable failures are
//! re-run on the exponential backoff schedule until attempts run out. Attempts
//! never overlap; a timed-out attempt is cancelled and awaited before the next
//! one is scheduled.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use log::{debug, error, info, warn};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use crate::error::{TaskError, TaskFailure};
use crate::heartbeat::{Heartbeat, HeartbeatSink};
use crate::policy::{ActivityOptions, PolicyError};
use crate::task::TaskResult;

/// Everything one attempt gets from its host
pub struct AttemptContext {
    /// 1-based attempt number
    pub attempt: u32,
    pub heartbeat: Arc<dyn HeartbeatSink>,
    /// Cancelled on caller request or when a deadline is exceeded
    pub cancel: CancellationToken,
}

/// A unit of work the orchestrator can run, and re-run, on its own schedule.
///
/// Implementations must return promptly once `ctx.cancel` fires and must not
/// leave anything running behind them.
pub trait Activity: Send + Sync {
    fn execute(&self, ctx: AttemptContext) -> impl Future<Output = Result<TaskResult, TaskError>> + Send;
}

/// Tracks liveness of a single attempt
struct HeartbeatMonitor {
    last: Mutex<Option<(Instant, Heartbeat)>>,
    observer: Option<Arc<dyn HeartbeatSink>>,
}

impl HeartbeatMonitor {
    fn new(observer: Option<Arc<dyn HeartbeatSink>>) -> Self {
        Self {
            last: Mutex::new(None),
            observer,
        }
    }

    fn last(&self) -> Option<(Instant, Heartbeat)> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HeartbeatSink for HeartbeatMonitor {
    fn record(&self, heartbeat: Heartbeat) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((Instant::now(), heartbeat));
        if let Some(observer) = &self.observer {
            observer.record(heartbeat);
        }
    }
}

pub struct Orchestrator {
    options: ActivityOptions,
    observer: Option<Arc<dyn HeartbeatSink>>,
}

impl Orchestrator {
    pub fn new(options: ActivityOptions) -> Result<Self, PolicyError> {
        options.validate()?;
        Ok(Self {
            options,
            observer: None,
        })
    }

    /// Also forward every heartbeat to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn HeartbeatSink>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    /// Run `activity` until it succeeds, fails permanently, or `cancel` fires.
    pub async fn execute<A: Activity>(
        &self,
        activity: &A,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, TaskFailure> {
        let policy = &self.options.retry_policy;
        let mut last_percent = None;
        let mut attempt = 1;

        loop {
            debug!("Starting attempt {}/{}", attempt, policy.maximum_attempts);
            let (result, last_beat) = self.run_attempt(activity, attempt, cancel).await;
            if let Some(beat) = last_beat {
                last_percent = Some(beat.percent);
            }

            let error = match result {
                Ok(result) => {
                    if attempt > 1 {
                        info!("Task succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !error.is_retryable() || !policy.allows_another_attempt(attempt) {
                error!("❌ Task failed permanently after {} attempt(s): {}", attempt, error);
                return Err(TaskFailure {
                    error,
                    attempts: attempt,
                    last_percent,
                });
            }

            let delay = policy.delay_before_retry(attempt);
            warn!("Attempt {}/{} failed: {}. Retrying in {:?}",
                  attempt, policy.maximum_attempts, error, delay);

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Task cancelled while waiting to retry");
                    return Err(TaskFailure {
                        error: TaskError::Cancelled,
                        attempts: attempt,
                        last_percent,
                    });
                }
                _ = sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    async fn run_attempt<A: Activity>(
        &self,
        activity: &A,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> (Result<TaskResult, TaskError>, Option<Heartbeat>) {
        let deadlines = &self.options.deadlines;
        let monitor = Arc::new(HeartbeatMonitor::new(self.observer.clone()));
        let attempt_cancel = cancel.child_token();

        let started = Instant::now();
        let close_deadline = started + deadlines.start_to_close_timeout;
        let heartbeat_deadline = |monitor: &HeartbeatMonitor| {
            monitor.last().map(|(at, _)| at).unwrap_or(started) + deadlines.heartbeat_timeout
        };

        let run = activity.execute(AttemptContext {
            attempt,
            heartbeat: monitor.clone(),
            cancel: attempt_cancel.clone(),
        });
        tokio::pin!(run);

        let mut breach: Option<TaskError> = None;
        let result = loop {
            let next_check = heartbeat_deadline(&*monitor).min(close_deadline);

            tokio::select! {
                result = &mut run => break result,
                _ = sleep_until(next_check), if breach.is_none() => {
                    let now = Instant::now();
                    if now >= close_deadline {
                        breach = Some(TaskError::StartToCloseTimeout(deadlines.start_to_close_timeout));
                    } else if now >= heartbeat_deadline(&*monitor) {
                        breach = Some(TaskError::HeartbeatTimeout(deadlines.heartbeat_timeout));
                    }

                    if let Some(err) = &breach {
                        warn!("⚠️  Attempt {} breached its deadline: {}. Cancelling", attempt, err);
                        attempt_cancel.cancel();
                    }
                }
            }
        };

        // A late result after a breach is discarded
        let result = match breach {
            Some(err) => Err(err),
            None => result,
        };
        (result, monitor.last().map(|(_, beat)| beat))
    }
}
