use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use crate::progress::SharedProgress;

/// Liveness record forwarded to the hosting orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub progress_ms: i64,
    pub total_ms: i64,
    pub percent: f64,
}

/// Receiver of heartbeats on the orchestrator side.
///
/// Called from both the stream consumer and the periodic reporter, so
/// implementations must be cheap and must not block.
pub trait HeartbeatSink: Send + Sync {
    fn record(&self, heartbeat: Heartbeat);
}

impl HeartbeatSink for mpsc::UnboundedSender<Heartbeat> {
    fn record(&self, heartbeat: Heartbeat) {
        // Receiver gone means nobody is watching any more
        let _ = self.send(heartbeat);
    }
}

/// Sink that drops every heartbeat
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl HeartbeatSink for NoopSink {
    fn record(&self, _heartbeat: Heartbeat) {}
}

/// Periodically reports the latest progress while a run is in flight.
///
/// The reporter emits on every tick whether or not progress moved, which is
/// what lets an orchestrator tell a slow task from a dead one. Call
/// [`LivenessReporter::stop`] before reporting the run's outcome: once it
/// returns the background task has exited and nothing more is emitted.
pub struct LivenessReporter {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LivenessReporter {
    /// Start reporting every `period`, first tick one period from now
    pub fn spawn(progress: SharedProgress, sink: Arc<dyn HeartbeatSink>, period: Duration) -> Self {
        use log::trace;

        // interval_at panics on a zero period
        let period = period.max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let beat = progress.heartbeat();
                        trace!("Periodic heartbeat: {}ms / {}ms ({:.1}%)", beat.progress_ms, beat.total_ms, beat.percent);
                        sink.record(beat);
                    }
                }
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop reporting and wait for the background task to finish
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::warn!("Liveness reporter task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for LivenessReporter {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        beats: Mutex<Vec<Heartbeat>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.beats.lock().unwrap().len()
        }
    }

    impl HeartbeatSink for RecordingSink {
        fn record(&self, heartbeat: Heartbeat) {
            self.beats.lock().unwrap().push(heartbeat);
        }
    }

    #[test]
    fn test_heartbeat_wire_names() {
        let beat = Heartbeat {
            progress_ms: 5000,
            total_ms: 10_000,
            percent: 50.0,
        };
        let json = serde_json::to_value(beat).unwrap();
        assert_eq!(json["progressMs"], 5000);
        assert_eq!(json["totalMs"], 10_000);
        assert_eq!(json["percent"], 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_without_new_progress() {
        let progress = SharedProgress::new();
        progress.observe_line("Duration: 00:00:10.00, start: 0.0");
        progress.observe_line("time=00:00:02.50");

        let sink = Arc::new(RecordingSink::default());
        let reporter = LivenessReporter::spawn(progress, sink.clone(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        reporter.stop().await;

        let beats = sink.beats.lock().unwrap().clone();
        assert_eq!(beats.len(), 3, "one heartbeat per elapsed period");
        for beat in beats {
            assert_eq!(beat.progress_ms, 2500);
            assert_eq!(beat.percent, 25.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_after_stop() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = LivenessReporter::spawn(SharedProgress::new(), sink.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        reporter.stop().await;
        let stopped_at = sink.count();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.count(), stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_reporter() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = LivenessReporter::spawn(SharedProgress::new(), sink.clone(), Duration::from_secs(1));
        drop(reporter);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn HeartbeatSink> = Arc::new(tx);
        sink.record(Heartbeat { progress_ms: 1, total_ms: 2, percent: 50.0 });
        assert_eq!(rx.recv().await.unwrap().progress_ms, 1);
    }
}
