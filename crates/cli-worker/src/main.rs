use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use worker::{
    config::WorkerConfig,
    heartbeat::{Heartbeat, HeartbeatSink},
    task::TaskParameters,
    workflow::{self, WorkflowExecution},
};

/// Transcode a video with FFmpeg under a timeout, heartbeat and retry policy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input video file path
    #[arg(short, long)]
    input: PathBuf,

    /// Output video file path
    #[arg(short, long)]
    output: PathBuf,

    /// FFmpeg arguments (space-separated)
    #[arg(long, allow_hyphen_values = true, default_value = "-c:v libx264 -preset medium -crf 23 -c:a copy")]
    ffmpeg_args: String,

    /// Workflow ID (defaults to auto-generated)
    #[arg(long)]
    workflow_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Logs progress whenever the whole-percent value changes
struct ProgressLogger {
    last_whole_percent: AtomicI64,
}

impl HeartbeatSink for ProgressLogger {
    fn record(&self, heartbeat: Heartbeat) {
        let whole = heartbeat.percent.floor() as i64;
        if self.last_whole_percent.swap(whole, Ordering::Relaxed) != whole {
            info!("Progress: {:.1}% ({}ms / {}ms)", heartbeat.percent, heartbeat.progress_ms, heartbeat.total_ms);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = WorkerConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("FFmpeg worker starting");
    info!("Configuration loaded:");
    info!("  Encoder: {}", cfg.encoder_bin.display());
    info!("  Task queue: {}", cfg.task_queue);
    info!("  Start-to-close timeout: {}s", cfg.start_to_close_timeout_secs);
    info!("  Heartbeat timeout: {}s (reporting every {}s)", cfg.heartbeat_timeout_secs, cfg.heartbeat_interval_secs);
    info!("  Retry: {} attempt(s), initial {}ms, x{}, max {}s",
          cfg.retry.maximum_attempts, cfg.retry.initial_interval_ms,
          cfg.retry.backoff_coefficient, cfg.retry.maximum_interval_secs);

    let params = TaskParameters::from_option_string(&args.input, &args.output, &args.ffmpeg_args);
    params.validate().context("Invalid task parameters")?;

    if !params.source_path.exists() {
        warn!("Input file does not exist: {}", params.source_path.display());
    }

    let execution = WorkflowExecution::new(args.workflow_id);
    info!("Starting workflow with ID: {} (run {})", execution.workflow_id, execution.run_id);
    info!("Input: {}", params.source_path.display());
    info!("Output: {}", params.destination_path.display());
    info!("FFmpeg args: {:?}", params.option_tokens);

    // Ctrl-C cancels the task and kills the encoder
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling workflow");
            on_signal.cancel();
        }
    });

    let observer: Arc<dyn HeartbeatSink> = Arc::new(ProgressLogger {
        last_whole_percent: AtomicI64::new(-1),
    });

    match workflow::process_video(&cfg, &execution, params, Some(observer), &cancel).await {
        Ok(result) => {
            info!("Workflow completed successfully");
            println!("{}", serde_json::to_string_pretty(&result)
                .context("Failed to serialize completion record")?);
            Ok(())
        }
        Err(failure) => {
            match failure.last_percent {
                Some(percent) => error!("Workflow failed at {:.1}%: {}", percent, failure),
                None => error!("Workflow failed: {}", failure),
            }
            Err(anyhow::Error::new(failure).context(format!("Workflow {} failed", execution.workflow_id)))
        }
    }
}
