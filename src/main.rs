use std::process::ExitCode;

use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::env::ProcessEnv;

mod app;
mod common;
mod config;
mod infrastructure;
mod modules;
mod state;
mod workers;

const DEFAULT_LOG_FILTER: &str = "info,aws_config=warn,aws_smithy_runtime=warn,hyper=warn";

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    info!("🎥 Transcode worker starting");

    let cancel = CancellationToken::new();
    app::listen_for_shutdown(cancel.clone());

    ExitCode::from(app::run(&ProcessEnv, cancel, app::create_state).await)
}
