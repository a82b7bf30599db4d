use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use super::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKey {
    Region,
    AccessKeyId,
    SecretAccessKey,
    SourceBucket,
    SourceKey,
    DestinationBucket,
    EndpointUrl,
    ObjectAcl,
    OutputPrefix,
    FfmpegPath,
    TranscodeTimeoutSecs,
    TranscodeFormat,
    TranscodeProfilePath,
    WorkDir,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::Region => "REGION_NAME",
            EnvKey::AccessKeyId => "AWS_ACCESS_KEY_ID",
            EnvKey::SecretAccessKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::SourceBucket => "S3_BUCKET",
            EnvKey::SourceKey => "S3_KEY",
            EnvKey::DestinationBucket => "S3_PROCESSED_VIDEOS_BUCKET",
            EnvKey::EndpointUrl => "S3_ENDPOINT_URL",
            EnvKey::ObjectAcl => "S3_OBJECT_ACL",
            EnvKey::OutputPrefix => "OUTPUT_PREFIX",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::TranscodeTimeoutSecs => "TRANSCODE_TIMEOUT_SECS",
            EnvKey::TranscodeFormat => "TRANSCODE_FORMAT",
            EnvKey::TranscodeProfilePath => "TRANSCODE_PROFILE_PATH",
            EnvKey::WorkDir => "WORK_DIR",
        }
    }
}

/// Where configuration values come from. The process environment in
/// production, a plain map in tests.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Returns the trimmed value, treating blank values as unset.
pub fn get(source: &impl EnvSource, key: EnvKey) -> Option<String> {
    source
        .var(key.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn require(source: &impl EnvSource, key: EnvKey) -> Result<String, ConfigError> {
    get(source, key).ok_or(ConfigError::Missing(key.as_str()))
}

pub fn get_or(source: &impl EnvSource, key: EnvKey, default: &str) -> String {
    get(source, key).unwrap_or_else(|| default.to_string())
}

/// Unlike a silent fallback, a value that is present but unparseable is an error.
pub fn get_parsed<T>(source: &impl EnvSource, key: EnvKey) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(source, key) {
        Some(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
        None => Ok(None),
    }
}
