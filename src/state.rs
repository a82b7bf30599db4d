use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::settings::AppConfig;
use crate::infrastructure::storage::ObjectStore;
use crate::modules::transcode::runner::TranscodeEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub storage: Arc<dyn ObjectStore>,
    pub engine: Arc<dyn TranscodeEngine>,
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        engine: Arc<dyn TranscodeEngine>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            storage,
            engine,
            cancel,
        }
    }
}
