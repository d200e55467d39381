pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod heartbeat;
pub mod orchestrator;
pub mod policy;
pub mod progress;
pub mod task;
pub mod workflow;

pub use config::WorkerConfig;
pub use error::{TaskError, TaskFailure};
pub use ffmpeg::FFmpegSupervisor;
pub use heartbeat::{Heartbeat, HeartbeatSink, LivenessReporter};
pub use orchestrator::{Activity, AttemptContext, Orchestrator};
pub use policy::{ActivityOptions, ExecutionDeadlines, RetryPolicy};
pub use progress::{ProgressState, SharedProgress};
pub use task::{TaskParameters, TaskResult};
pub use workflow::{process_video, TranscodeActivity, WorkflowExecution};
