//! Screenshot capture with bounded retries.
//!
//! A capture never returns an error: exhausted retries are recorded in the
//! [`CaptureResult`] so sibling captures and the rest of the workflow carry on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use garde::Validate;
use image::ImageFormat;

use crate::config::AppConfig;
use crate::models::capture::{ArtifactRef, CaptureReport, CaptureResult, ScreenType, Viewport};
use crate::services::artifacts::{ArtifactError, ArtifactStore};
use crate::services::browser::{BackendError, CaptureBackend, CaptureTarget};
use crate::services::clock::Clock;
use crate::services::retry::RetryPolicy;

/// Capture parameters that stay fixed for the lifetime of a service.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub target_url: String,
    pub user_agent: String,
    pub viewports: BTreeMap<String, Viewport>,
    pub screen_types: Vec<ScreenType>,
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
    pub max_concurrency: usize,
}

impl CaptureSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            target_url: config.target_url.clone(),
            user_agent: config.user_agent.clone(),
            viewports: config.viewports.clone(),
            screen_types: config.screen_types.clone(),
            retry: config.capture_retry_policy(),
            attempt_timeout: config.capture_attempt_timeout(),
            max_concurrency: config.capture_max_concurrency,
        }
    }
}

#[derive(Clone)]
pub struct CaptureService {
    backend: Arc<dyn CaptureBackend>,
    artifacts: Arc<ArtifactStore>,
    clock: Arc<dyn Clock>,
    settings: CaptureSettings,
}

impl CaptureService {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        artifacts: Arc<ArtifactStore>,
        clock: Arc<dyn Clock>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            backend,
            artifacts,
            clock,
            settings,
        }
    }

    /// Same service pointed at a different application address.
    pub fn for_target(&self, url: &str) -> Self {
        let mut service = self.clone();
        service.settings.target_url = url.to_string();
        service
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn viewport_ids(&self) -> Vec<String> {
        self.settings.viewports.keys().cloned().collect()
    }

    /// Capture one screen at one viewport, retrying per the retry policy.
    pub async fn capture(&self, viewport_id: &str, screen_type: ScreenType) -> CaptureResult {
        let failed = |error: String, attempt_count: u32| CaptureResult {
            viewport_id: viewport_id.to_string(),
            screen_type,
            success: false,
            artifact: None,
            error: Some(error),
            attempt_count,
        };

        let Some(viewport) = self.settings.viewports.get(viewport_id) else {
            return failed(CaptureError::UnknownViewport(viewport_id.to_string()).to_string(), 0);
        };
        if let Err(report) = viewport.validate() {
            return failed(CaptureError::InvalidViewport(report.to_string()).to_string(), 0);
        }

        let retry = self.settings.retry;
        let mut attempts = 0;
        let mut last_error = String::from("no capture attempts were made");

        while attempts < retry.max_attempts {
            attempts += 1;
            let delay = retry.delay_before(attempts);
            if !delay.is_zero() {
                tracing::info!(
                    viewport = %viewport.name,
                    screen_type = %screen_type,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying capture"
                );
                tokio::time::sleep(delay).await;
            }

            metrics::counter!("capture_attempts_total", "screen_type" => screen_type.to_string())
                .increment(1);
            let started = Instant::now();

            match self.attempt(viewport, screen_type).await {
                Ok(artifact) => {
                    metrics::histogram!("capture_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::info!(
                        viewport = %viewport.name,
                        screen_type = %screen_type,
                        attempt = attempts,
                        filename = %artifact.filename,
                        "Capture saved"
                    );
                    return CaptureResult {
                        viewport_id: viewport_id.to_string(),
                        screen_type,
                        success: true,
                        artifact: Some(artifact),
                        error: None,
                        attempt_count: attempts,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        viewport = %viewport.name,
                        screen_type = %screen_type,
                        attempt = attempts,
                        error = %e,
                        "Capture attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        metrics::counter!("capture_failures_total", "screen_type" => screen_type.to_string())
            .increment(1);
        tracing::error!(
            viewport = %viewport.name,
            screen_type = %screen_type,
            attempts,
            error = %last_error,
            "Capture failed after all attempts"
        );
        failed(last_error, attempts)
    }

    /// Capture every (viewport, screen type) pair, at most
    /// `max_concurrency` at a time. Empty slices mean "all configured".
    pub async fn capture_all(
        &self,
        viewport_ids: &[String],
        screen_types: &[ScreenType],
    ) -> CaptureReport {
        let viewport_ids = if viewport_ids.is_empty() {
            self.viewport_ids()
        } else {
            viewport_ids.to_vec()
        };
        let screen_types = if screen_types.is_empty() {
            self.settings.screen_types.clone()
        } else {
            screen_types.to_vec()
        };

        tracing::info!(
            viewports = viewport_ids.len(),
            screen_types = screen_types.len(),
            target = %self.settings.target_url,
            "Starting capture for all viewports"
        );

        let pairs: Vec<(String, ScreenType)> = viewport_ids
            .iter()
            .flat_map(|vp| screen_types.iter().map(move |st| (vp.clone(), *st)))
            .collect();

        let results: Vec<CaptureResult> = stream::iter(pairs)
            .map(|(viewport_id, screen_type)| async move {
                self.capture(&viewport_id, screen_type).await
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        let report = CaptureReport::from_results(self.clock.now(), results);

        match self.artifacts.save_report(&report).await {
            Ok(path) => tracing::info!(path = %path.display(), "Capture report saved"),
            Err(e) => tracing::warn!(error = %e, "Failed to save capture report"),
        }
        tracing::info!(
            success = report.summary.success,
            failed = report.summary.failed,
            total = report.summary.total,
            "Capture summary"
        );

        report
    }

    async fn attempt(
        &self,
        viewport: &Viewport,
        screen_type: ScreenType,
    ) -> Result<ArtifactRef, CaptureError> {
        let target = CaptureTarget {
            url: &self.settings.target_url,
            viewport,
            screen_type,
            user_agent: &self.settings.user_agent,
        };

        let bytes = tokio::time::timeout(
            self.settings.attempt_timeout,
            self.backend.screenshot(&target),
        )
        .await
        .map_err(|_| CaptureError::Timeout(self.settings.attempt_timeout))??;

        let inspected = inspect_image(&bytes)?;
        let extension = inspected.format.extensions_str().first().copied().unwrap_or("png");
        let stamp = self.clock.now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let filename = format!("{screen_type}-{}-{stamp}.{extension}", viewport.slug());

        Ok(self
            .artifacts
            .save_screenshot(&filename, &bytes, inspected.width, inspected.height)
            .await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InspectedImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// Decode screenshot bytes and reject empty or single-colour images.
pub fn inspect_image(bytes: &[u8]) -> Result<InspectedImage, CaptureError> {
    let format =
        image::guess_format(bytes).map_err(|e| CaptureError::InvalidImage(e.to_string()))?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| CaptureError::InvalidImage(e.to_string()))?;

    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(CaptureError::InvalidImage("image has no pixels".to_string()));
    }

    let pixels = decoded.to_rgba8();
    let mut iter = pixels.pixels();
    if let Some(first) = iter.next() {
        if iter.all(|p| p == first) {
            return Err(CaptureError::BlankScreen);
        }
    }

    Ok(InspectedImage {
        format,
        width,
        height,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("Screenshot is not a valid image: {0}")]
    InvalidImage(String),

    #[error("Screenshot is blank")]
    BlankScreen,

    #[error("Failed to store screenshot: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Unknown viewport: {0}")]
    UnknownViewport(String),

    #[error("Invalid viewport: {0}")]
    InvalidViewport(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode_png(image: RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_inspect_accepts_varied_image() {
        let image = RgbImage::from_fn(8, 4, |x, y| Rgb([(x * 30) as u8, (y * 60) as u8, 128]));
        let inspected = inspect_image(&encode_png(image)).unwrap();
        assert_eq!(inspected.format, ImageFormat::Png);
        assert_eq!((inspected.width, inspected.height), (8, 4));
    }

    #[test]
    fn test_inspect_rejects_blank_image() {
        let image = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
        assert!(matches!(
            inspect_image(&encode_png(image)),
            Err(CaptureError::BlankScreen)
        ));
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        assert!(matches!(
            inspect_image(b"<html>502 Bad Gateway</html>"),
            Err(CaptureError::InvalidImage(_))
        ));
    }
}
