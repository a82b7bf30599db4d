use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command::CommandBuilder;
use super::error::{TranscodeError, TranscodeResult};
use super::model::{OutputManifest, Profile, TranscodeInvocation};

/// The external engine as seen by the worker: build an invocation, then run it.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    fn build(
        &self,
        input: &Path,
        output_dir: &Path,
        profile: &Profile,
    ) -> TranscodeResult<TranscodeInvocation>;

    async fn run(
        &self,
        invocation: &TranscodeInvocation,
        cancel: &CancellationToken,
    ) -> TranscodeResult<OutputManifest>;
}

pub struct FfmpegEngine {
    program: PathBuf,
    timeout: Option<Duration>,
    builder: CommandBuilder,
}

impl FfmpegEngine {
    pub fn new(program: impl Into<PathBuf>, builder: CommandBuilder) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            builder,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn build(
        &self,
        input: &Path,
        output_dir: &Path,
        profile: &Profile,
    ) -> TranscodeResult<TranscodeInvocation> {
        self.builder.build(input, output_dir, profile)
    }

    async fn run(
        &self,
        invocation: &TranscodeInvocation,
        cancel: &CancellationToken,
    ) -> TranscodeResult<OutputManifest> {
        for dir in invocation.output_dirs() {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let program = self.program.display().to_string();
        debug!("Running {} {}", program, invocation.args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = deadline => {
                let limit = timeout.unwrap_or_default();
                warn!("{} timed out after {} seconds, killing process", program, limit.as_secs());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program, e);
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(TranscodeError::Timeout(limit));
            }
            _ = cancel.cancelled() => {
                info!("Transcode cancelled, killing {}", program);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program, e);
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(TranscodeError::Cancelled);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        if !stdout.is_empty() {
            debug!("{} stdout: {}", program, stdout.trim_end());
        }

        if !status.success() {
            error!(
                "{} exited with {} ({} bytes of stderr)",
                program,
                status,
                stderr.len()
            );
            return Err(TranscodeError::Failed {
                exit_code: status.code(),
                stdout,
                stderr,
            });
        }

        let mut missing = Vec::new();
        for expected in &invocation.expected_outputs {
            if !tokio::fs::try_exists(expected).await.unwrap_or(false) {
                missing.push(expected.clone());
            }
        }
        if !missing.is_empty() {
            error!(
                "{} exited successfully but left {} expected output(s) missing",
                program,
                missing.len()
            );
            return Err(TranscodeError::MissingOutput {
                missing,
                stdout,
                stderr,
            });
        }

        let files = collect_files(&invocation.working_dir).await?;
        info!("Transcoding finished successfully, {} file(s) produced", files.len());

        Ok(OutputManifest {
            exit_code: status.code().unwrap_or(0),
            stdout,
            stderr,
            root: invocation.working_dir.clone(),
            manifests: invocation.expected_outputs.clone(),
            files,
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            warn!("Failed to read engine output: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Every regular file below `root`, sorted.
pub async fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Resolves the engine executable on PATH.
pub fn locate_engine(program: &Path) -> Result<PathBuf, which::Error> {
    which::which(program)
}
