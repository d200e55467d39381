use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::TaskError;

/// Input of one transcoding task, fixed for every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParameters {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    /// Encoder options placed between the input and the output, in order
    pub option_tokens: Vec<String>,
}

impl TaskParameters {
    pub fn new(
        source_path: impl Into<PathBuf>,
        destination_path: impl Into<PathBuf>,
        option_tokens: Vec<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            option_tokens,
        }
    }

    /// Build parameters from a whitespace-separated option string, e.g. `-c:v libx264 -crf 23`
    pub fn from_option_string(
        source_path: impl Into<PathBuf>,
        destination_path: impl Into<PathBuf>,
        options: &str,
    ) -> Self {
        Self::new(
            source_path,
            destination_path,
            options.split_whitespace().map(str::to_string).collect(),
        )
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.source_path.as_os_str().is_empty() {
            return Err(TaskError::InvalidParameters("source path is empty".to_string()));
        }
        if self.destination_path.as_os_str().is_empty() {
            return Err(TaskError::InvalidParameters("destination path is empty".to_string()));
        }
        Ok(())
    }

    /// Encoder arguments: `-i <source> <options...> <destination>`
    pub fn encoder_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.option_tokens.len() + 3);
        args.push("-i".to_string());
        args.push(self.source_path.to_string_lossy().to_string());
        args.extend(self.option_tokens.iter().cloned());
        args.push(self.destination_path.to_string_lossy().to_string());
        args
    }
}

/// Completion record of a successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub destination_path: PathBuf,
    /// Media duration reported by the encoder, 0 if it never printed one
    pub duration_ms: i64,
    /// Wall-clock time from invocation to process exit
    pub processing_time: Duration,
}
