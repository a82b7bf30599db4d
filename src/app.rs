use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::error::{EXIT_SUCCESS, WorkerError};
use crate::config::env::EnvSource;
use crate::config::settings::AppConfig;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::transcode::command::CommandBuilder;
use crate::modules::transcode::runner::{FfmpegEngine, locate_engine};
use crate::state::AppState;
use crate::workers::transcoder::run_job;

pub fn create_state(config: AppConfig, cancel: CancellationToken) -> AppState {
    let storage = StorageService::new(&config);
    let engine = FfmpegEngine::new(&config.ffmpeg_path, CommandBuilder::new(&config.work_dir))
        .with_timeout(config.transcode_timeout);

    AppState::new(config, Arc::new(storage), Arc::new(engine), cancel)
}

/// Loads settings, runs the job and returns the process exit code.
/// `build_state` is only called once the configuration is valid.
pub async fn run<F>(source: &impl EnvSource, cancel: CancellationToken, build_state: F) -> u8
where
    F: FnOnce(AppConfig, CancellationToken) -> AppState,
{
    let config = match AppConfig::from_source(source) {
        Ok(config) => config,
        Err(e) => {
            let err = WorkerError::from(e);
            err.report();
            return err.exit_code();
        }
    };
    debug!(
        "Settings: REGION={}, S3_BUCKET={}, DEST_BUCKET={}, FORMAT={}",
        config.region, config.source_bucket, config.destination_bucket, config.profile.format
    );

    check_engine(&config);

    let state = build_state(config, cancel);
    match run_job(&state).await {
        Ok(report) => {
            info!(
                job_id = %report.job_id,
                "Video processing completed successfully ({} file(s) uploaded)",
                report.uploads.len()
            );
            EXIT_SUCCESS
        }
        Err(failure) => {
            failure.error.report();
            error!(
                job_id = %failure.job_id,
                failed_in = %failure.failed_in,
                "Job ended with exit code {} after {} upload attempt(s)",
                failure.exit_code(),
                failure.uploads.len()
            );
            failure.exit_code()
        }
    }
}

fn check_engine(config: &AppConfig) {
    match locate_engine(&config.ffmpeg_path) {
        Ok(path) => debug!("Using transcoding engine at {}", path.display()),
        Err(_) => warn!(
            "{} was not found on PATH. Transcoding will fail unless it is installed in the image or host.",
            config.ffmpeg_path.display()
        ),
    }
}

/// Cancels `cancel` on Ctrl-C or SIGTERM.
pub fn listen_for_shutdown(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, cancelling job");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
