use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type TranscodeResult<T> = Result<T, TranscodeError>;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("output directory {0} is outside the transcode workspace")]
    InvalidOutputDir(PathBuf),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("transcoding engine failed (returncode={})", .exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Failed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("transcoding engine exited successfully but {} expected output(s) are missing: {missing:?}", .missing.len())]
    MissingOutput {
        missing: Vec<PathBuf>,
        stdout: String,
        stderr: String,
    },

    #[error("transcoding timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("transcoding cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// Captured engine output, when the engine got far enough to produce any.
    pub fn output(&self) -> Option<(&str, &str)> {
        match self {
            TranscodeError::Failed { stdout, stderr, .. }
            | TranscodeError::MissingOutput { stdout, stderr, .. } => {
                Some((stdout.as_str(), stderr.as_str()))
            }
            _ => None,
        }
    }

    /// The engine ran and reported a failure (or an incomplete success),
    /// as opposed to the worker failing around it.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            TranscodeError::Failed { .. }
                | TranscodeError::MissingOutput { .. }
                | TranscodeError::Timeout(_)
        )
    }
}
