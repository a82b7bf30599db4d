use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::common::error::{WorkerError, tail};
use crate::common::upload::{input_extension, object_key};
use crate::infrastructure::storage::StorageResult;
use crate::modules::transcode::model::OutputManifest;
use crate::state::AppState;

const ENGINE_LOG_TAIL: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Init,
    Fetching,
    Transcoding,
    Uploading,
    Done,
    Failed(String),
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Init => f.write_str("init"),
            JobState::Fetching => f.write_str("fetching"),
            JobState::Transcoding => f.write_str("transcoding"),
            JobState::Uploading => f.write_str("uploading"),
            JobState::Done => f.write_str("done"),
            JobState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Uploaded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub local_path: PathBuf,
    pub key: String,
    pub status: UploadStatus,
}

#[derive(Debug)]
pub struct JobReport {
    pub job_id: Uuid,
    pub state: JobState,
    pub uploads: Vec<UploadOutcome>,
}

#[derive(Debug)]
pub struct JobFailure {
    pub job_id: Uuid,
    /// Stage that was running when the job failed.
    pub failed_in: JobState,
    pub error: WorkerError,
    /// Uploads attempted before the failure. Successful ones are not rolled back.
    pub uploads: Vec<UploadOutcome>,
}

impl JobFailure {
    pub fn state(&self) -> JobState {
        JobState::Failed(self.error.to_string())
    }

    pub fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}

/// Runs the whole fetch → transcode → upload pipeline once.
pub async fn run_job(ctx: &AppState) -> Result<JobReport, JobFailure> {
    let job_id = Uuid::new_v4();
    let span = info_span!(
        "job",
        %job_id,
        source = %format!("s3://{}/{}", ctx.config.source_bucket, ctx.config.source_key)
    );

    let mut job = Job {
        ctx,
        current: JobState::Init,
        uploads: Vec::new(),
    };

    match job.execute().instrument(span).await {
        Ok(()) => Ok(JobReport {
            job_id,
            state: job.current,
            uploads: job.uploads,
        }),
        Err(error) => {
            warn!(%job_id, "Job failed during {}: {}", job.current, error);
            Err(JobFailure {
                job_id,
                failed_in: job.current,
                error,
                uploads: job.uploads,
            })
        }
    }
}

struct Job<'a> {
    ctx: &'a AppState,
    current: JobState,
    uploads: Vec<UploadOutcome>,
}

impl Job<'_> {
    fn advance(&mut self, next: JobState) {
        info!("Job state {} -> {}", self.current, next);
        self.current = next;
    }

    fn ensure_active(&self) -> Result<(), WorkerError> {
        if self.ctx.cancel.is_cancelled() {
            Err(WorkerError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn execute(&mut self) -> Result<(), WorkerError> {
        self.ensure_active()?;
        self.advance(JobState::Fetching);

        let ctx = self.ctx;
        let work_dir = &ctx.config.work_dir;
        tokio::fs::create_dir_all(work_dir).await?;
        let workspace = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(work_dir)?;
        debug!("Workspace {}", workspace.path().display());

        let result = self.process(workspace.path()).await;

        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!("Failed to remove workspace {}: {}", path.display(), e);
        }

        result
    }

    async fn process(&mut self, workspace: &Path) -> Result<(), WorkerError> {
        let ctx = self.ctx;
        let config = &ctx.config;
        let cancel = &ctx.cancel;

        let input = workspace.join(format!("input.{}", input_extension(&config.source_key)));
        let output_dir = workspace.join("output");

        let input = cancellable(
            cancel,
            ctx.storage
                .fetch(&config.source_bucket, &config.source_key, &input),
        )
        .await?;

        self.ensure_active()?;
        self.advance(JobState::Transcoding);
        info!("Starting transcoding: {} -> {}", input.display(), output_dir.display());

        let invocation = ctx.engine.build(&input, &output_dir, &config.profile)?;
        let manifest = ctx.engine.run(&invocation, cancel).await?;
        log_engine_output(&manifest);

        self.ensure_active()?;
        self.advance(JobState::Uploading);
        self.upload_all(&manifest).await?;

        self.advance(JobState::Done);
        Ok(())
    }

    async fn upload_all(&mut self, manifest: &OutputManifest) -> Result<(), WorkerError> {
        let ctx = self.ctx;
        let config = &ctx.config;
        info!(
            "Uploading {} file(s) from {} to bucket {} with prefix {}",
            manifest.files.len(),
            manifest.root.display(),
            config.destination_bucket,
            config.output_prefix
        );

        for file in &manifest.files {
            let key = object_key(&config.output_prefix, &manifest.root, file).ok_or_else(|| {
                WorkerError::Io(std::io::Error::other(format!(
                    "{} is outside the output directory",
                    file.display()
                )))
            })?;

            let result = cancellable(
                &ctx.cancel,
                ctx.storage.store(&config.destination_bucket, &key, file),
            )
            .await;

            match result {
                Ok(()) => {
                    debug!("Uploaded {} -> s3://{}/{}", file.display(), config.destination_bucket, key);
                    self.uploads.push(UploadOutcome {
                        local_path: file.clone(),
                        key,
                        status: UploadStatus::Uploaded,
                    });
                }
                Err(e) => {
                    self.uploads.push(UploadOutcome {
                        local_path: file.clone(),
                        key,
                        status: UploadStatus::Failed(e.to_string()),
                    });
                    let uploaded = self.uploaded_count();
                    if uploaded > 0 {
                        warn!(
                            "{} object(s) already uploaded under s3://{}/{} are left in place",
                            uploaded, config.destination_bucket, config.output_prefix
                        );
                    }
                    return Err(e);
                }
            }
        }

        info!("Upload complete");
        Ok(())
    }

    fn uploaded_count(&self) -> usize {
        self.uploads
            .iter()
            .filter(|u| u.status == UploadStatus::Uploaded)
            .count()
    }
}

fn log_engine_output(manifest: &OutputManifest) {
    let names: Vec<_> = manifest
        .manifests
        .iter()
        .filter_map(|m| m.strip_prefix(&manifest.root).ok())
        .map(|m| m.display().to_string())
        .collect();
    info!(
        "Engine exited with code {}, manifests: {}",
        manifest.exit_code,
        names.join(", ")
    );
    if !manifest.stdout.is_empty() {
        debug!("Engine stdout (tail): {}", tail(&manifest.stdout, ENGINE_LOG_TAIL));
    }
    if !manifest.stderr.is_empty() {
        debug!("Engine stderr (tail): {}", tail(&manifest.stderr, ENGINE_LOG_TAIL));
    }
}

/// Races a storage call against the job's cancellation token.
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = StorageResult<T>>,
) -> Result<T, WorkerError> {
    tokio::select! {
        result = operation => Ok(result?),
        _ = cancel.cancelled() => Err(WorkerError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::{EXIT_CANCELLED, EXIT_RUNTIME, EXIT_TRANSCODE};
    use crate::modules::transcode::error::TranscodeError;
    use crate::workers::fakes::{EngineBehavior, FakeEngine, FakeStore, test_config, test_state};
    use std::sync::Arc;

    fn dash_outputs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("manifest.mpd", "<MPD/>"),
            ("init-stream0.m4s", "i0"),
            ("init-stream1.m4s", "i1"),
            ("chunk-stream0-00001.m4s", "c0"),
            ("chunk-stream1-00001.m4s", "c1"),
        ]
    }

    #[tokio::test]
    async fn uploads_every_output_and_finishes() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_object("src", "video.mp4", b"source bytes"));
        let engine = Arc::new(FakeEngine::new(EngineBehavior::Produce(dash_outputs())));
        let state = test_state(test_config(work.path()), store.clone(), engine.clone());

        let report = run_job(&state).await.unwrap();

        assert_eq!(report.state, JobState::Done);
        assert_eq!(report.uploads.len(), 5);
        assert!(report.uploads.iter().all(|u| u.status == UploadStatus::Uploaded));

        let stored = store.stored();
        let keys: Vec<_> = stored.iter().map(|(b, k, _)| (b.as_str(), k.as_str())).collect();
        assert_eq!(
            keys,
            vec![
                ("out", "video.mp4/chunk-stream0-00001.m4s"),
                ("out", "video.mp4/chunk-stream1-00001.m4s"),
                ("out", "video.mp4/init-stream0.m4s"),
                ("out", "video.mp4/init-stream1.m4s"),
                ("out", "video.mp4/manifest.mpd"),
            ]
        );
        assert_eq!(stored[4].2, b"<MPD/>".to_vec());

        assert_eq!(engine.runs(), 1);
        let args = engine.last_args().unwrap();
        assert!(args.iter().any(|a| a.ends_with("input.mp4")));
        assert!(args.iter().any(|a| a == "-b:v:1"), "two-rung ladder");
        assert!(!args.iter().any(|a| a == "-b:v:2"));

        let leftovers = std::fs::read_dir(work.path()).unwrap().count();
        assert_eq!(leftovers, 0, "workspace removed after the job");
    }

    #[tokio::test]
    async fn missing_source_never_reaches_the_engine() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::default());
        let engine = Arc::new(FakeEngine::new(EngineBehavior::Produce(dash_outputs())));
        let state = test_state(test_config(work.path()), store.clone(), engine.clone());

        let failure = run_job(&state).await.unwrap_err();

        assert_eq!(failure.exit_code(), EXIT_RUNTIME);
        assert_eq!(failure.failed_in, JobState::Fetching);
        assert!(matches!(failure.state(), JobState::Failed(_)));
        assert_eq!(engine.builds(), 0);
        assert_eq!(engine.runs(), 0);
        assert!(store.stored().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_exits_with_transcode_code() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_object("src", "video.mp4", b"source bytes"));
        let engine = Arc::new(FakeEngine::new(EngineBehavior::Fail {
            exit_code: 1,
            stderr: "unsupported codec".to_string(),
        }));
        let state = test_state(test_config(work.path()), store.clone(), engine);

        let failure = run_job(&state).await.unwrap_err();

        assert_eq!(failure.exit_code(), EXIT_TRANSCODE);
        assert_eq!(failure.failed_in, JobState::Transcoding);
        assert!(failure.error.summary().contains("unsupported codec"));
        assert!(store.stored().is_empty());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn incomplete_output_is_a_transcode_failure() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_object("src", "video.mp4", b"source bytes"));
        let engine = Arc::new(FakeEngine::new(EngineBehavior::Produce(vec![(
            "chunk-stream0-00001.m4s",
            "c0",
        )])));
        let state = test_state(test_config(work.path()), store.clone(), engine);

        let failure = run_job(&state).await.unwrap_err();

        assert!(matches!(
            failure.error,
            WorkerError::Transcode(TranscodeError::MissingOutput { .. })
        ));
        assert_eq!(failure.exit_code(), EXIT_TRANSCODE);
        assert!(store.stored().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_stops_the_job_without_rollback() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(
            FakeStore::with_object("src", "video.mp4", b"source bytes")
                .failing_store_for("init-stream0.m4s"),
        );
        let engine = Arc::new(FakeEngine::new(EngineBehavior::Produce(dash_outputs())));
        let state = test_state(test_config(work.path()), store.clone(), engine);

        let failure = run_job(&state).await.unwrap_err();

        assert_eq!(failure.exit_code(), EXIT_RUNTIME);
        assert_eq!(failure.failed_in, JobState::Uploading);
        let statuses: Vec<_> = failure.uploads.iter().map(|u| &u.status).collect();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0], &UploadStatus::Uploaded);
        assert_eq!(statuses[1], &UploadStatus::Uploaded);
        assert!(matches!(statuses[2], UploadStatus::Failed(_)));
        assert_eq!(store.stored().len(), 2, "nothing after the failed file is attempted");
    }

    #[tokio::test]
    async fn hls_outputs_keep_variant_directories() {
        let work = tempfile::tempdir().unwrap();
        let mut config = test_config(work.path());
        config.profile.format = crate::modules::transcode::model::StreamFormat::Hls;
        config.output_prefix = "processed/video".to_string();
        let store = Arc::new(FakeStore::with_object("src", "video.mp4", b"source bytes"));
        let engine = Arc::new(FakeEngine::new(EngineBehavior::Produce(vec![
            ("master.m3u8", "#EXTM3U"),
            ("360p/playlist.m3u8", "#EXTM3U"),
            ("360p/segment_000.ts", "ts"),
            ("720p/playlist.m3u8", "#EXTM3U"),
            ("720p/segment_000.ts", "ts"),
        ])));
        let state = test_state(config, store.clone(), engine);

        run_job(&state).await.unwrap();

        let keys: Vec<_> = store.stored().into_iter().map(|(_, k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                "processed/video/360p/playlist.m3u8",
                "processed/video/360p/segment_000.ts",
                "processed/video/720p/playlist.m3u8",
                "processed/video/720p/segment_000.ts",
                "processed/video/master.m3u8",
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_job_does_nothing() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_object("src", "video.mp4", b"source bytes"));
        let engine = Arc::new(FakeEngine::new(EngineBehavior::Produce(dash_outputs())));
        let state = test_state(test_config(work.path()), store.clone(), engine.clone());
        state.cancel.cancel();

        let failure = run_job(&state).await.unwrap_err();

        assert!(matches!(failure.error, WorkerError::Cancelled));
        assert_eq!(failure.exit_code(), EXIT_CANCELLED);
        assert_eq!(failure.failed_in, JobState::Init);
        assert_eq!(store.fetches(), 0);
        assert_eq!(engine.runs(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_transcode_stops_the_job() {
        let work = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::with_object("src", "video.mp4", b"source bytes"));
        let engine = Arc::new(FakeEngine::new(EngineBehavior::WaitForCancel));
        let state = test_state(test_config(work.path()), store.clone(), engine);

        let cancel = state.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let failure = run_job(&state).await.unwrap_err();

        assert!(matches!(failure.error, WorkerError::Cancelled));
        assert_eq!(failure.failed_in, JobState::Transcoding);
        assert!(store.stored().is_empty());
    }
}
