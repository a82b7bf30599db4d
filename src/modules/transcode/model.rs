use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    Dash,
    Hls,
}

impl StreamFormat {
    pub fn default_manifest_name(&self) -> &'static str {
        match self {
            StreamFormat::Dash => "manifest.mpd",
            StreamFormat::Hls => "master.m3u8",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFormat::Dash => f.write_str("dash"),
            StreamFormat::Hls => f.write_str("hls"),
        }
    }
}

impl FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dash" => Ok(StreamFormat::Dash),
            "hls" => Ok(StreamFormat::Hls),
            other => Err(format!("unknown stream format '{}', expected dash or hls", other)),
        }
    }
}

/// One step of the bitrate ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Rung {
    #[validate(length(min = 1, max = 32, message = "Rung name must be 1-32 characters"))]
    pub name: String,
    #[validate(range(min = 2, max = 7680))]
    pub width: u32,
    #[validate(range(min = 2, max = 4320))]
    pub height: u32,
    #[validate(range(min = 1, max = 1_000_000, message = "Video bitrate must be 1-1000000 kbps"))]
    pub video_bitrate_kbps: u32,
}

impl Rung {
    pub fn new(name: &str, width: u32, height: u32, video_bitrate_kbps: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            video_bitrate_kbps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AudioSettings {
    #[validate(length(min = 1))]
    pub codec: String,
    #[validate(range(min = 1, max = 1_024))]
    pub bitrate_kbps: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate_kbps: 128,
        }
    }
}

/// Target codecs, bitrates and segment parameters for one transcode.
///
/// Loadable from JSON; omitted fields take the built-in DASH values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Profile {
    pub format: StreamFormat,
    #[validate(length(min = 1))]
    pub video_codec: String,
    #[validate(length(min = 1))]
    pub preset: String,
    #[validate(length(min = 1))]
    pub h264_profile: String,
    #[validate(length(min = 1))]
    pub level: String,
    #[validate(range(min = 1, max = 600))]
    pub gop_size: u32,
    #[validate(range(min = 1, max = 60))]
    pub segment_duration_secs: u32,
    #[validate(nested)]
    pub audio: Option<AudioSettings>,
    pub manifest_name: Option<String>,
    #[validate(length(min = 1, message = "At least one rung is required"), nested)]
    pub rungs: Vec<Rung>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            format: StreamFormat::Dash,
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            h264_profile: "high".to_string(),
            level: "4.1".to_string(),
            gop_size: 48,
            segment_duration_secs: 6,
            audio: Some(AudioSettings::default()),
            manifest_name: None,
            rungs: vec![
                Rung::new("360p", 640, 360, 1000),
                Rung::new("720p", 1280, 720, 4000),
                Rung::new("1080p", 1920, 1080, 8000),
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("{0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("rung name '{0}' may only contain letters, digits, '-' and '_'")]
    InvalidRungName(String),

    #[error("duplicate rung name '{0}'")]
    DuplicateRung(String),

    #[error("rung '{name}' has odd dimensions {width}x{height}")]
    OddDimensions { name: String, width: u32, height: u32 },

    #[error("manifest name '{0}' must be a plain file name")]
    InvalidManifestName(String),
}

impl Profile {
    pub fn for_format(format: StreamFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn manifest_name(&self) -> &str {
        self.manifest_name
            .as_deref()
            .unwrap_or_else(|| self.format.default_manifest_name())
    }

    /// Checks everything the command builder relies on: rung names end up in
    /// filter labels and HLS directory names, dimensions go to the scaler.
    pub fn check(&self) -> Result<(), ProfileError> {
        self.validate()?;

        let mut seen = HashSet::new();
        for rung in &self.rungs {
            if !rung
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(ProfileError::InvalidRungName(rung.name.clone()));
            }
            if !seen.insert(rung.name.as_str()) {
                return Err(ProfileError::DuplicateRung(rung.name.clone()));
            }
            if rung.width % 2 != 0 || rung.height % 2 != 0 {
                return Err(ProfileError::OddDimensions {
                    name: rung.name.clone(),
                    width: rung.width,
                    height: rung.height,
                });
            }
        }

        let manifest = self.manifest_name();
        let is_plain = Path::new(manifest)
            .file_name()
            .is_some_and(|name| name == manifest);
        if manifest.is_empty() || !is_plain || manifest.contains('\\') {
            return Err(ProfileError::InvalidManifestName(manifest.to_string()));
        }

        Ok(())
    }
}

/// A fully built engine call. Never mutated once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeInvocation {
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub expected_outputs: Vec<PathBuf>,
}

impl TranscodeInvocation {
    /// Directories that must exist before the engine starts writing.
    pub fn output_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.working_dir.clone()];
        for output in &self.expected_outputs {
            if let Some(parent) = output.parent() {
                if !dirs.iter().any(|d| d == parent) {
                    dirs.push(parent.to_path_buf());
                }
            }
        }
        dirs
    }
}

/// What a successful engine run left behind.
#[derive(Debug, Clone)]
pub struct OutputManifest {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub root: PathBuf,
    pub manifests: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}
