#![allow(dead_code)]

//! Test doubles and wiring for workflow tests

use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::watch;

use screen_verify::models::task::{TaskStatus, VerificationTask};
use screen_verify::services::artifacts::ArtifactStore;
use screen_verify::services::browser::{BackendError, CaptureBackend, CaptureTarget};
use screen_verify::services::capture::{CaptureService, CaptureSettings};
use screen_verify::services::clock::SystemClock;
use screen_verify::services::orchestrator::Orchestrator;
use screen_verify::services::waiter::WaitSettings;
use screen_verify::store::{FsStore, MemoryStore, TaskStore};

use crate::fixtures;

pub fn varied_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 90])
    });
    encode(image)
}

pub fn blank_png(width: u32, height: u32) -> Vec<u8> {
    encode(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
}

fn encode(image: RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

/// What the fake backend does for one call.
#[derive(Debug, Clone)]
pub enum Shot {
    Image,
    Blank,
    Fail(&'static str),
    Hang,
}

/// Scripted screenshot backend. Calls pop from `script` first, then fall
/// back to a failure for viewports in `broken_viewports`, else an image.
#[derive(Default)]
pub struct FakeBackend {
    script: Mutex<VecDeque<Shot>>,
    broken_viewports: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn scripted(shots: impl IntoIterator<Item = Shot>) -> Self {
        Self {
            script: Mutex::new(shots.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every capture of a viewport with this display name fails.
    pub fn breaking(viewport_name: &str) -> Self {
        Self {
            broken_viewports: HashSet::from([viewport_name.to_string()]),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for FakeBackend {
    async fn screenshot(&self, target: &CaptureTarget<'_>) -> Result<Vec<u8>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().expect("script lock").pop_front();
        let shot = scripted.unwrap_or_else(|| {
            if self.broken_viewports.contains(&target.viewport.name) {
                Shot::Fail("page crashed")
            } else {
                Shot::Image
            }
        });

        match shot {
            Shot::Image => Ok(varied_png(target.viewport.width / 10, target.viewport.height / 10)),
            Shot::Blank => Ok(blank_png(16, 16)),
            Shot::Fail(reason) => Err(BackendError::Other(reason.to_string())),
            Shot::Hang => std::future::pending().await,
        }
    }
}

/// An orchestrator over an in-memory store and a temp artifact directory.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub backend: Arc<FakeBackend>,
    pub capture: CaptureService,
    pub orchestrator: Arc<Orchestrator>,
    pub shutdown: watch::Sender<bool>,
    pub captures_dir: TempDir,
}

impl Harness {
    pub async fn new(backend: FakeBackend) -> Self {
        Self::with_settings(backend, fixtures::capture_settings()).await
    }

    pub async fn with_settings(backend: FakeBackend, settings: CaptureSettings) -> Self {
        let captures_dir = TempDir::new().expect("tempdir");
        let artifacts = Arc::new(
            ArtifactStore::open(captures_dir.path())
                .await
                .expect("artifact dir"),
        );
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(backend);
        let clock = Arc::new(SystemClock);
        let capture = CaptureService::new(backend.clone(), artifacts, clock.clone(), settings);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let orchestrator = Orchestrator::new(
            store.clone(),
            capture.clone(),
            clock,
            fixtures::wait_settings(),
            fixtures::REVIEW_TIMEOUT,
        )
        .with_shutdown(shutdown_rx);

        Self {
            store,
            backend,
            capture,
            orchestrator: Arc::new(orchestrator),
            shutdown,
            captures_dir,
        }
    }

    pub async fn task(&self, id: &str) -> VerificationTask {
        self.store
            .get(id)
            .await
            .expect("store read")
            .expect("task exists")
    }
}

/// An orchestrator with its own file store handle on `state_dir`, the way a
/// separate CLI process sees the same records.
pub async fn fs_orchestrator(
    state_dir: &Path,
    captures_dir: &Path,
    wait_settings: WaitSettings,
) -> Orchestrator {
    let store = Arc::new(FsStore::open(state_dir).await.expect("state dir"));
    let artifacts = Arc::new(ArtifactStore::open(captures_dir).await.expect("artifact dir"));
    let clock = Arc::new(SystemClock);
    let capture = CaptureService::new(
        Arc::new(FakeBackend::healthy()),
        artifacts,
        clock.clone(),
        fixtures::capture_settings(),
    );
    Orchestrator::new(store, capture, clock, wait_settings, fixtures::REVIEW_TIMEOUT)
}

/// Poll until some task reaches `verification-pending` and return it.
pub async fn wait_for_pending(store: &MemoryStore) -> VerificationTask {
    loop {
        let pending = store
            .list_tasks(Some(TaskStatus::VerificationPending))
            .await
            .expect("list tasks");
        if let Some(task) = pending.into_iter().next() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
