use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

use crate::config::ConfigError;
use crate::infrastructure::storage::StorageError;
use crate::modules::transcode::error::TranscodeError;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_RUNTIME: u8 = 1;
pub const EXIT_CONFIGURATION: u8 = 2;
pub const EXIT_TRANSCODE: u8 = 3;
pub const EXIT_CANCELLED: u8 = 130;

const STDERR_SNIPPET: usize = 2000;
const STDOUT_SNIPPET: usize = 1000;

/// Everything that can end a job. Each variant maps to one process exit code.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Transcode(TranscodeError),

    #[error("transcoding timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("job cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TranscodeError> for WorkerError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Timeout(limit) => WorkerError::Timeout(limit),
            TranscodeError::Cancelled => WorkerError::Cancelled,
            other => WorkerError::Transcode(other),
        }
    }
}

/// Truncated engine output attached to a transcoding failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub stdout: String,
}

impl WorkerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            WorkerError::Configuration(_) => EXIT_CONFIGURATION,
            WorkerError::Storage(_) | WorkerError::Io(_) => EXIT_RUNTIME,
            WorkerError::Transcode(e) if e.is_engine_failure() => EXIT_TRANSCODE,
            WorkerError::Transcode(_) => EXIT_RUNTIME,
            WorkerError::Timeout(_) => EXIT_TRANSCODE,
            WorkerError::Cancelled => EXIT_CANCELLED,
        }
    }

    pub fn diagnostics(&self) -> Option<Diagnostics> {
        let WorkerError::Transcode(err) = self else {
            return None;
        };
        let (stdout, stderr) = err.output()?;
        let exit_code = match err {
            TranscodeError::Failed { exit_code, .. } => *exit_code,
            _ => Some(0),
        };
        Some(Diagnostics {
            exit_code,
            stderr: tail(stderr, STDERR_SNIPPET).to_string(),
            stdout: tail(stdout, STDOUT_SNIPPET).to_string(),
        })
    }

    /// Single-line summary logged before exit.
    pub fn summary(&self) -> String {
        match self.diagnostics() {
            Some(diag) => format!("{}. stderr_snip={}", self, diag.stderr.trim()),
            None => self.to_string(),
        }
    }

    pub fn report(&self) {
        match self {
            WorkerError::Configuration(_) => {
                error!("Failed to initialize worker: {}", self.summary())
            }
            WorkerError::Transcode(_) | WorkerError::Timeout(_) => {
                error!("Transcoding failed: {}", self.summary());
                if let Some(diag) = self.diagnostics() {
                    if !diag.stdout.is_empty() {
                        debug!("Transcoding stdout (truncated): {}", diag.stdout);
                    }
                }
            }
            WorkerError::Cancelled => error!("Video processing cancelled"),
            _ => error!("Video processing failed: {}", self.summary()),
        }
    }
}

/// Last `max_chars` characters of `text`. ffmpeg prints its banner first and
/// the actual error last.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
