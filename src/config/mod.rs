pub mod env;
pub mod settings;

use std::path::PathBuf;

use thiserror::Error;

use crate::modules::transcode::model::ProfileError;
use env::EnvKey;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read transcode profile {path}: {source}")]
    ProfileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse transcode profile {path}: {source}")]
    ProfileParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid transcode profile: {0}")]
    Profile(#[from] ProfileError),
}

impl ConfigError {
    pub fn invalid(key: EnvKey, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.as_str(),
            reason: reason.into(),
        }
    }
}
