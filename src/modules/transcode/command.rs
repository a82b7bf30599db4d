//! Argument construction for the ffmpeg ABR ladder.

use std::path::{Component, Path, PathBuf};

use super::error::{TranscodeError, TranscodeResult};
use super::model::{Profile, StreamFormat, TranscodeInvocation};

/// Builds engine argument lists. Pure: never touches the filesystem, and the
/// same input always yields the same arguments.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    workspace_root: PathBuf,
}

impl CommandBuilder {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    pub fn build(
        &self,
        input: &Path,
        output_dir: &Path,
        profile: &Profile,
    ) -> TranscodeResult<TranscodeInvocation> {
        self.check_output_dir(output_dir)?;

        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            path_arg(input),
            "-filter_complex".into(),
            filter_graph(profile),
        ];

        args.extend(video_args(profile));

        let expected_outputs = match profile.format {
            StreamFormat::Dash => {
                args.extend(dash_args(profile, output_dir));
                vec![output_dir.join(profile.manifest_name())]
            }
            StreamFormat::Hls => {
                args.extend(hls_args(profile, output_dir));
                let mut outputs = vec![output_dir.join(profile.manifest_name())];
                outputs.extend(
                    profile
                        .rungs
                        .iter()
                        .map(|rung| output_dir.join(&rung.name).join("playlist.m3u8")),
                );
                outputs
            }
        };

        Ok(TranscodeInvocation {
            args,
            working_dir: output_dir.to_path_buf(),
            expected_outputs,
        })
    }

    /// The output directory must sit strictly below the workspace root,
    /// judged lexically.
    fn check_output_dir(&self, output_dir: &Path) -> TranscodeResult<()> {
        let lexically_clean = output_dir
            .components()
            .all(|c| !matches!(c, Component::ParentDir | Component::CurDir));

        if output_dir.is_absolute()
            && lexically_clean
            && output_dir.starts_with(&self.workspace_root)
            && output_dir != self.workspace_root
        {
            Ok(())
        } else {
            Err(TranscodeError::InvalidOutputDir(output_dir.to_path_buf()))
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn rung_label(name: &str) -> String {
    format!("v{}", name)
}

fn filter_graph(profile: &Profile) -> String {
    let count = profile.rungs.len();
    let splits: String = (0..count).map(|i| format!("[s{}]", i)).collect();

    let mut graph = format!("[0:v]split={}{}", count, splits);
    for (i, rung) in profile.rungs.iter().enumerate() {
        graph.push_str(&format!(
            ";[s{}]scale={}:{}:flags=fast_bilinear[{}]",
            i,
            rung.width,
            rung.height,
            rung_label(&rung.name)
        ));
    }
    graph
}

fn video_args(profile: &Profile) -> Vec<String> {
    let gop = profile.gop_size.to_string();
    let mut args: Vec<String> = vec![
        "-c:v".into(),
        profile.video_codec.clone(),
        "-preset".into(),
        profile.preset.clone(),
        "-profile:v".into(),
        profile.h264_profile.clone(),
        "-level:v".into(),
        profile.level.clone(),
        "-g".into(),
        gop.clone(),
        "-keyint_min".into(),
        gop,
        "-sc_threshold".into(),
        "0".into(),
    ];

    for (i, rung) in profile.rungs.iter().enumerate() {
        args.extend([
            "-map".into(),
            format!("[{}]", rung_label(&rung.name)),
            format!("-b:v:{}", i),
            format!("{}k", rung.video_bitrate_kbps),
            format!("-maxrate:v:{}", i),
            format!("{}k", rung.video_bitrate_kbps),
            format!("-bufsize:v:{}", i),
            format!("{}k", u64::from(rung.video_bitrate_kbps) * 2),
        ]);
    }

    args
}

fn audio_codec_args(profile: &Profile) -> Vec<String> {
    match &profile.audio {
        Some(audio) => vec![
            "-c:a".into(),
            audio.codec.clone(),
            "-b:a".into(),
            format!("{}k", audio.bitrate_kbps),
        ],
        None => vec!["-an".into()],
    }
}

fn dash_args(profile: &Profile, output_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();
    let adaptation_sets = if profile.audio.is_some() {
        args.extend(["-map".to_string(), "0:a:0".to_string()]);
        "id=0,streams=v id=1,streams=a"
    } else {
        "id=0,streams=v"
    };
    args.extend(audio_codec_args(profile));

    args.extend([
        "-use_timeline".into(),
        "1".into(),
        "-use_template".into(),
        "1".into(),
        "-window_size".into(),
        "0".into(),
        "-seg_duration".into(),
        profile.segment_duration_secs.to_string(),
        "-adaptation_sets".into(),
        adaptation_sets.into(),
        "-f".into(),
        "dash".into(),
        path_arg(&output_dir.join(profile.manifest_name())),
    ]);
    args
}

fn hls_args(profile: &Profile, output_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();
    let with_audio = profile.audio.is_some();
    if with_audio {
        for _ in &profile.rungs {
            args.extend(["-map".to_string(), "0:a:0".to_string()]);
        }
    }
    args.extend(audio_codec_args(profile));

    let stream_map = profile
        .rungs
        .iter()
        .enumerate()
        .map(|(i, rung)| {
            if with_audio {
                format!("v:{i},a:{i},name:{}", rung.name)
            } else {
                format!("v:{i},name:{}", rung.name)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        profile.segment_duration_secs.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_flags".into(),
        "independent_segments".into(),
        "-hls_segment_type".into(),
        "mpegts".into(),
        "-hls_list_size".into(),
        "0".into(),
        "-master_pl_name".into(),
        profile.manifest_name().to_string(),
        "-var_stream_map".into(),
        stream_map,
        "-hls_segment_filename".into(),
        path_arg(&output_dir.join("%v").join("segment_%03d.ts")),
        path_arg(&output_dir.join("%v").join("playlist.m3u8")),
    ]);
    args
}
