use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use regex::Regex;
use crate::heartbeat::Heartbeat;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: ([0-9]+:[0-9]+:[0-9]+\.[0-9]+)").expect("valid duration regex"));
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=([0-9]+:[0-9]+:[0-9]+\.[0-9]+)").expect("valid progress regex"));

/// Extract the total media duration from an encoder banner line.
///
/// Example: `  Duration: 00:01:05.25, start: 0.000000, bitrate: 2048 kb/s` -> `Some(65250)`
pub fn parse_duration_line(line: &str) -> Option<i64> {
    DURATION_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| time_to_milliseconds(m.as_str()))
}

/// Extract the current encode position from a status line.
///
/// Example: `frame= 120 fps= 30 time=00:00:04.00 bitrate=...` -> `Some(4000)`
pub fn parse_progress_line(line: &str) -> Option<i64> {
    PROGRESS_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| time_to_milliseconds(m.as_str()))
}

/// Convert `HH:MM:SS.fraction` to milliseconds.
///
/// Never fails: a string without exactly three `:`-separated fields yields 0,
/// and any malformed numeric field counts as 0.
pub fn time_to_milliseconds(time_str: &str) -> i64 {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return 0;
    }

    let hours = parts[0].parse::<i64>().unwrap_or(0);
    let minutes = parts[1].parse::<i64>().unwrap_or(0);
    let (seconds, millis) = parse_seconds_field(parts[2]);

    hours
        .saturating_mul(3600)
        .saturating_add(minutes.saturating_mul(60))
        .saturating_add(seconds)
        .saturating_mul(1000)
        .saturating_add(millis)
}

/// Split a `SS.fraction` field into whole seconds and milliseconds.
///
/// The fraction is truncated or right-padded to exactly three digits:
/// `"1.5"` -> `(1, 500)`, `"1.123456"` -> `(1, 123)`, `"1."` and `"1"` -> `(1, 0)`.
pub fn parse_seconds_field(field: &str) -> (i64, i64) {
    let mut pieces = field.split('.');
    let seconds = pieces
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    let millis = match pieces.next() {
        Some(fraction) if !fraction.is_empty() => {
            let mut digits: String = fraction.chars().take(3).collect();
            while digits.chars().count() < 3 {
                digits.push('0');
            }
            digits.parse::<i64>().unwrap_or(0)
        }
        _ => 0,
    };

    (seconds, millis)
}

/// Progress percentage, unclamped since encoders can overshoot the reported duration
pub fn calculate_percentage(current: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    current as f64 / total as f64 * 100.0
}

/// What a single diagnostic line changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineUpdate {
    pub duration_captured: bool,
    pub progress_updated: bool,
}

/// Progress of one run, as observed on the diagnostic stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    /// Total media duration; 0 means unknown
    pub total_duration_ms: i64,
    /// Latest encode position reported
    pub current_progress_ms: i64,
    duration_captured: bool,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn percent_complete(&self) -> f64 {
        calculate_percentage(self.current_progress_ms, self.total_duration_ms)
    }

    /// Fold one line of encoder output into the state.
    ///
    /// Only the first duration line is honoured; every progress line replaces
    /// the current position.
    pub fn observe_line(&mut self, line: &str) -> LineUpdate {
        let mut update = LineUpdate::default();

        if !self.duration_captured {
            if let Some(total) = parse_duration_line(line) {
                self.total_duration_ms = total;
                self.duration_captured = true;
                update.duration_captured = true;
            }
        }

        if let Some(current) = parse_progress_line(line) {
            self.current_progress_ms = current;
            update.progress_updated = true;
        }

        update
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            progress_ms: self.current_progress_ms,
            total_ms: self.total_duration_ms,
            percent: self.percent_complete(),
        }
    }
}

/// Progress state shared between the stream consumer and the liveness reporter.
///
/// Readers only ever need the latest value, so a plain mutex is enough.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress {
    inner: Arc<Mutex<ProgressState>>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        // A panicked writer leaves a usable snapshot behind
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn observe_line(&self, line: &str) -> LineUpdate {
        self.lock().observe_line(line)
    }

    pub fn snapshot(&self) -> ProgressState {
        self.lock().clone()
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.lock().heartbeat()
    }
}
