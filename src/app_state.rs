use std::sync::Arc;

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::services::{
    artifacts::{ArtifactError, ArtifactStore},
    browser::{BackendError, HttpCaptureBackend},
    capture::{CaptureService, CaptureSettings},
    clock::{Clock, SystemClock},
    orchestrator::Orchestrator,
    waiter::WaitSettings,
};
use crate::store::{FsStore, StoreError, TaskStore};

/// Shared services wired from configuration, used by both binaries.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn TaskStore>,
    pub artifacts: Arc<ArtifactStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Open the state and capture directories and build the orchestrator.
    /// Waits stop once `shutdown` turns true.
    pub async fn build(
        config: AppConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, StartupError> {
        tracing::info!(state_dir = %config.state_dir.display(), "Opening task store");
        let store: Arc<dyn TaskStore> = Arc::new(FsStore::open(&config.state_dir).await?);

        tracing::info!(captures_dir = %config.captures_dir.display(), "Opening artifact directory");
        let artifacts = Arc::new(ArtifactStore::open(&config.captures_dir).await?);

        tracing::info!(backend = %config.capture_backend_url, "Initializing capture backend");
        let backend = Arc::new(HttpCaptureBackend::new(
            &config.capture_backend_url,
            config.capture_backend_token.clone(),
        )?);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let capture = CaptureService::new(
            backend,
            artifacts.clone(),
            clock.clone(),
            CaptureSettings::from_config(&config),
        );
        let orchestrator = Orchestrator::new(
            store.clone(),
            capture,
            clock,
            WaitSettings::from_config(&config),
            config.review_timeout(),
        )
        .with_shutdown(shutdown);

        Ok(Self {
            config: Arc::new(config),
            store,
            artifacts,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Task store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Capture directory unavailable: {0}")]
    Artifacts(#[from] ArtifactError),

    #[error("Capture backend misconfigured: {0}")]
    Backend(#[from] BackendError),
}
