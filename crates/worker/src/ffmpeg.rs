use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use crate::config::{WorkerConfig, DEFAULT_MAX_DIAGNOSTIC_BYTES};
use crate::error::TaskError;
use crate::heartbeat::{HeartbeatSink, LivenessReporter};
use crate::progress::SharedProgress;
use crate::task::{TaskParameters, TaskResult};

/// Runs the encoder for one task attempt and reports its progress.
#[derive(Debug, Clone)]
pub struct FFmpegSupervisor {
    pub ffmpeg_bin: PathBuf,
    /// Bytes of diagnostic output parsed per run; anything beyond is discarded
    pub max_diagnostic_bytes: u64,
    /// Period of the liveness reporter
    pub heartbeat_interval: Duration,
}

impl Default for FFmpegSupervisor {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            max_diagnostic_bytes: DEFAULT_MAX_DIAGNOSTIC_BYTES,
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

enum RunOutcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

impl FFmpegSupervisor {
    pub fn new(cfg: &WorkerConfig) -> Self {
        Self {
            ffmpeg_bin: cfg.encoder_bin.clone(),
            max_diagnostic_bytes: cfg.max_diagnostic_bytes,
            heartbeat_interval: cfg.heartbeat_interval(),
        }
    }

    /// Run the encoder to completion.
    ///
    /// Every line of diagnostic output is folded into the run's progress and
    /// immediately forwarded to `heartbeat`; a [`LivenessReporter`] repeats the
    /// latest snapshot on a fixed period in between. Both stop before this
    /// returns. Cancelling `cancel` kills the process and waits for it to exit.
    pub async fn run(
        &self,
        params: &TaskParameters,
        heartbeat: Arc<dyn HeartbeatSink>,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, TaskError> {
        params.validate()?;

        info!("🎬 Starting FFmpeg processing: {} -> {}",
              params.source_path.display(), params.destination_path.display());

        let started = Instant::now();
        let args = params.encoder_args();
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        // Only stderr carries progress; stdout is status noise
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| {
            error!("Failed to spawn FFmpeg at {}: {}", self.ffmpeg_bin.display(), source);
            TaskError::ProcessStart {
                program: self.ffmpeg_bin.display().to_string(),
                source,
            }
        })?;

        let stderr = child.stderr.take().ok_or_else(|| TaskError::ProcessStart {
            program: self.ffmpeg_bin.display().to_string(),
            source: std::io::Error::other("stderr was not captured"),
        })?;

        let progress = SharedProgress::new();
        let reporter = LivenessReporter::spawn(progress.clone(), heartbeat.clone(), self.heartbeat_interval);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RunOutcome::Cancelled,
            status = self.drive(&mut child, stderr, &progress, &*heartbeat) => RunOutcome::Exited(status),
        };

        let status = match outcome {
            RunOutcome::Cancelled => {
                warn!("⚠️  FFmpeg run cancelled, terminating process for {}", params.source_path.display());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill FFmpeg process: {}", e);
                }
                reporter.stop().await;
                return Err(TaskError::Cancelled);
            }
            RunOutcome::Exited(status) => {
                reporter.stop().await;
                status
            }
        };

        let status = status.map_err(|e| TaskError::ProcessExecution {
            code: None,
            detail: format!("failed to wait for FFmpeg: {}", e),
        })?;

        if !status.success() {
            error!("❌ FFmpeg exited unsuccessfully ({}) for {}", status, params.source_path.display());
            return Err(TaskError::ProcessExecution {
                code: status.code(),
                detail: status.to_string(),
            });
        }

        let processing_time = started.elapsed();
        let snapshot = progress.snapshot();
        info!("✅ FFmpeg processing completed in {:?}: {}",
              processing_time, params.destination_path.display());

        Ok(TaskResult {
            destination_path: params.destination_path.clone(),
            duration_ms: snapshot.total_duration_ms,
            processing_time,
        })
    }

    async fn drive(
        &self,
        child: &mut Child,
        stderr: ChildStderr,
        progress: &SharedProgress,
        heartbeat: &dyn HeartbeatSink,
    ) -> std::io::Result<ExitStatus> {
        consume_diagnostics(stderr, self.max_diagnostic_bytes, |line| {
            let update = progress.observe_line(line);
            let beat = progress.heartbeat();
            if update.duration_captured {
                info!("Video duration: {}ms", beat.total_ms);
            }
            if update.progress_updated {
                debug!("Processing progress: {}ms / {}ms ({:.1}%)", beat.progress_ms, beat.total_ms, beat.percent);
            }
            // Forward every line so progress is visible before the next periodic tick
            heartbeat.record(beat);
        })
        .await;

        child.wait().await
    }
}

/// Feed diagnostic output to `on_line` one line at a time.
///
/// Lines end at `\n` or `\r` (live status lines are carriage-return
/// terminated) and are decoded lossily. At most `limit` bytes are parsed; the
/// rest of the stream is drained without being buffered so the writer never
/// stalls on a full pipe. Read errors end parsing early and are only logged.
///
/// Returns the number of bytes parsed.
pub async fn consume_diagnostics<R, F>(reader: R, limit: u64, mut on_line: F) -> u64
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader.take(limit));
    let mut pending: Vec<u8> = Vec::new();
    let mut parsed: u64 = 0;

    let mut emit = |bytes: &[u8]| {
        let text = String::from_utf8_lossy(bytes);
        let line = text.trim();
        if !line.is_empty() {
            on_line(line);
        }
    };

    loop {
        let (used, line_complete) = match reader.fill_buf().await {
            Ok(available) if available.is_empty() => break,
            Ok(available) => match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    pending.extend_from_slice(&available[..pos]);
                    (pos + 1, true)
                }
                None => {
                    pending.extend_from_slice(available);
                    (available.len(), false)
                }
            },
            Err(e) => {
                warn!("Error reading FFmpeg diagnostics: {}", e);
                break;
            }
        };
        reader.consume(used);
        parsed += used as u64;

        if line_complete {
            emit(&pending);
            pending.clear();
        }
    }

    if !pending.is_empty() {
        emit(&pending);
    }

    let mut rest = reader.into_inner().into_inner();
    match tokio::io::copy(&mut rest, &mut tokio::io::sink()).await {
        Ok(0) => {}
        Ok(discarded) => debug!("Diagnostic cap of {} bytes reached, discarded {} bytes", limit, discarded),
        Err(e) => debug!("Stopped draining FFmpeg diagnostics: {}", e),
    }

    parsed
}
