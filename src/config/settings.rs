use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use aws_sdk_s3::types::ObjectCannedAcl;
use url::Url;
use validator::Validate;

use super::ConfigError;
use crate::config::env::{self, EnvKey, EnvSource};
use crate::modules::transcode::model::{Profile, StreamFormat};

const DEFAULT_WORK_DIR: &str = "/tmp/workspace";
const DEFAULT_FFMPEG: &str = "ffmpeg";
const MAX_KEY_BYTES: usize = 1024;

/// Immutable job configuration. Built once by the entrypoint and handed to
/// every component.
#[derive(Clone, Validate)]
pub struct AppConfig {
    #[validate(length(min = 1, max = 32, message = "Region must be 1-32 characters"))]
    pub region: String,
    #[validate(length(min = 16, max = 128, message = "Access key id must be 16-128 characters"))]
    pub access_key_id: String,
    #[validate(length(min = 1, message = "Secret access key is required"))]
    pub secret_access_key: String,
    pub source_bucket: String,
    pub source_key: String,
    pub destination_bucket: String,
    pub output_prefix: String,
    pub endpoint_url: Option<Url>,
    pub object_acl: Option<String>,
    pub ffmpeg_path: PathBuf,
    pub transcode_timeout: Option<Duration>,
    pub work_dir: PathBuf,
    pub profile: Profile,
}

impl AppConfig {
    pub fn from_source(source: &impl EnvSource) -> Result<Self, ConfigError> {
        let region = env::require(source, EnvKey::Region)?;
        let access_key_id = env::require(source, EnvKey::AccessKeyId)?;
        let secret_access_key = env::require(source, EnvKey::SecretAccessKey)?;
        let source_bucket = env::require(source, EnvKey::SourceBucket)?;
        let source_key = env::require(source, EnvKey::SourceKey)?;
        let destination_bucket = env::require(source, EnvKey::DestinationBucket)?;

        validate_region(&region)?;
        validate_bucket_name(EnvKey::SourceBucket, &source_bucket)?;
        validate_bucket_name(EnvKey::DestinationBucket, &destination_bucket)?;
        if source_key.len() > MAX_KEY_BYTES {
            return Err(ConfigError::invalid(
                EnvKey::SourceKey,
                format!("object key must be at most {} bytes", MAX_KEY_BYTES),
            ));
        }
        if source_key.starts_with('/') {
            return Err(ConfigError::invalid(
                EnvKey::SourceKey,
                "object key must not start with '/'",
            ));
        }

        let output_prefix = env::get(source, EnvKey::OutputPrefix)
            .unwrap_or_else(|| source_key.clone())
            .trim_end_matches('/')
            .to_string();
        if output_prefix.is_empty() {
            return Err(ConfigError::invalid(EnvKey::OutputPrefix, "prefix is empty"));
        }

        let endpoint_url = env::get_parsed::<Url>(source, EnvKey::EndpointUrl)?;
        if let Some(url) = &endpoint_url {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::invalid(
                    EnvKey::EndpointUrl,
                    format!("unsupported scheme '{}'", url.scheme()),
                ));
            }
        }

        let object_acl = env::get(source, EnvKey::ObjectAcl);
        if let Some(acl) = &object_acl {
            if !ObjectCannedAcl::values().contains(&acl.as_str()) {
                return Err(ConfigError::invalid(
                    EnvKey::ObjectAcl,
                    format!("unknown canned ACL '{}'", acl),
                ));
            }
        }

        let transcode_timeout = env::get_parsed::<u64>(source, EnvKey::TranscodeTimeoutSecs)?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let work_dir = PathBuf::from(env::get_or(source, EnvKey::WorkDir, DEFAULT_WORK_DIR));
        if !work_dir.is_absolute() {
            return Err(ConfigError::invalid(EnvKey::WorkDir, "path must be absolute"));
        }
        if work_dir
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        {
            return Err(ConfigError::invalid(
                EnvKey::WorkDir,
                "path must not contain '.' or '..' components",
            ));
        }

        let format = env::get_parsed::<StreamFormat>(source, EnvKey::TranscodeFormat)?
            .unwrap_or(StreamFormat::Dash);
        let profile = match env::get(source, EnvKey::TranscodeProfilePath) {
            Some(path) => load_profile(Path::new(&path))?,
            None => Profile::for_format(format),
        };
        profile.check()?;

        let config = Self {
            region,
            access_key_id,
            secret_access_key,
            source_bucket,
            source_key,
            destination_bucket,
            output_prefix,
            endpoint_url,
            object_acl,
            ffmpeg_path: PathBuf::from(env::get_or(source, EnvKey::FfmpegPath, DEFAULT_FFMPEG)),
            transcode_timeout,
            work_dir,
            profile,
        };

        config.validate().map_err(|e| ConfigError::Invalid {
            key: "configuration",
            reason: e.to_string(),
        })?;

        Ok(config)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("source_bucket", &self.source_bucket)
            .field("source_key", &self.source_key)
            .field("destination_bucket", &self.destination_bucket)
            .field("output_prefix", &self.output_prefix)
            .field("endpoint_url", &self.endpoint_url.as_ref().map(Url::as_str))
            .field("object_acl", &self.object_acl)
            .field("ffmpeg_path", &self.ffmpeg_path)
            .field("transcode_timeout", &self.transcode_timeout)
            .field("work_dir", &self.work_dir)
            .field("profile", &self.profile)
            .finish()
    }
}

fn load_profile(path: &Path) -> Result<Profile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ProfileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::ProfileParse {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_region(region: &str) -> Result<(), ConfigError> {
    let ok = region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !region.starts_with('-')
        && !region.ends_with('-');
    if ok {
        Ok(())
    } else {
        Err(ConfigError::invalid(EnvKey::Region, format!("'{}' is not a region name", region)))
    }
}

/// S3 bucket naming rules: 3-63 chars of lowercase letters, digits, dots and
/// hyphens, alphanumeric at both ends, no "..", not an IPv4 address.
fn validate_bucket_name(key: EnvKey, name: &str) -> Result<(), ConfigError> {
    let reason = if !(3..=63).contains(&name.len()) {
        Some("must be 3-63 characters")
    } else if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        Some("may only contain lowercase letters, digits, '.' and '-'")
    } else if !name.starts_with(|c: char| c.is_ascii_alphanumeric())
        || !name.ends_with(|c: char| c.is_ascii_alphanumeric())
    {
        Some("must start and end with a letter or digit")
    } else if name.contains("..") {
        Some("must not contain consecutive dots")
    } else if name.parse::<std::net::Ipv4Addr>().is_ok() {
        Some("must not be formatted as an IP address")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::invalid(key, format!("'{}' {}", name, reason))),
        None => Ok(()),
    }
}
