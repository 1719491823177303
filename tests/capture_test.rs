//! Capture retries against a scripted screenshot backend.

mod fixtures;
mod helpers;

use fixtures::*;
use helpers::*;
use screen_verify::models::capture::ScreenType;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_retry_stops_at_first_success() {
    let h = Harness::new(FakeBackend::scripted([
        Shot::Fail("net::ERR_CONNECTION_REFUSED"),
        Shot::Blank,
        Shot::Image,
    ]))
    .await;

    let started = Instant::now();
    let result = h.capture.capture(PHONE, ScreenType::AppLoad).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.attempt_count, 3);
    assert_eq!(h.backend.calls(), 3);
    // Two fixed 2s delays between three attempts.
    assert!(started.elapsed() >= std::time::Duration::from_secs(4));

    let artifact = result.artifact.expect("artifact");
    assert!(artifact.filename.starts_with("app-load-test-phone-"));
    assert_eq!((artifact.width, artifact.height), (40, 87));
}

#[tokio::test(start_paused = true)]
async fn test_first_success_makes_a_single_attempt() {
    let h = Harness::new(FakeBackend::healthy()).await;
    let result = h.capture.capture(TABLET, ScreenType::Dashboard).await;
    assert!(result.success);
    assert_eq!(result.attempt_count, 1);
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blank_screens_exhaust_attempts() {
    let h = Harness::new(FakeBackend::scripted([Shot::Blank, Shot::Blank, Shot::Blank])).await;
    let result = h.capture.capture(PHONE, ScreenType::ContentLoad).await;

    assert!(!result.success);
    assert_eq!(result.attempt_count, 3);
    assert!(result.artifact.is_none());
    assert_eq!(result.error.as_deref(), Some("Screenshot is blank"));
}

#[tokio::test(start_paused = true)]
async fn test_hung_backend_attempts_time_out() {
    let h = Harness::new(FakeBackend::scripted([Shot::Hang, Shot::Hang, Shot::Hang])).await;
    let result = h.capture.capture(PHONE, ScreenType::AppLoad).await;

    assert!(!result.success);
    assert_eq!(result.attempt_count, 3);
    assert!(result.error.unwrap_or_default().contains("timed out"));
}

#[tokio::test]
async fn test_unknown_viewport_makes_no_attempts() {
    let h = Harness::new(FakeBackend::healthy()).await;
    let result = h.capture.capture("smart-fridge", ScreenType::AppLoad).await;

    assert!(!result.success);
    assert_eq!(result.attempt_count, 0);
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_capture_all_covers_every_pair_and_saves_report() {
    let h = Harness::new(FakeBackend::breaking("Test Phone")).await;
    let report = h.capture.capture_all(&[], &[]).await;

    assert_eq!(report.summary.total, 6);
    assert_eq!(report.summary.success, 3);
    assert_eq!(report.summary.failed, 3);
    assert_eq!(report.captures.len(), 2);
    assert!(report.captures[PHONE].values().all(|r| !r.success && r.attempt_count == 3));
    assert!(report.captures[TABLET].values().all(|r| r.success));

    let saved = std::fs::read_dir(h.captures_dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().starts_with("capture-report-"));
    assert!(saved);
}
