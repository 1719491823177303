#![allow(dead_code)]

//! Shared viewports, specs and reviewer responses for workflow tests

use std::collections::BTreeMap;
use std::time::Duration;

use screen_verify::models::capture::{ScreenType, Viewport};
use screen_verify::models::review::{ReviewResponse, ReviewVerdict};
use screen_verify::models::task::TaskSpec;
use screen_verify::services::capture::CaptureSettings;
use screen_verify::services::retry::{Backoff, RetryPolicy};
use screen_verify::services::waiter::WaitSettings;

pub const PHONE: &str = "phone";
pub const TABLET: &str = "tablet";

pub const REVIEW_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const POLL_INTERVAL: Duration = Duration::from_millis(2_000);

pub fn viewports() -> BTreeMap<String, Viewport> {
    BTreeMap::from([
        (
            PHONE.to_string(),
            Viewport {
                width: 402,
                height: 874,
                name: "Test Phone".to_string(),
            },
        ),
        (
            TABLET.to_string(),
            Viewport {
                width: 820,
                height: 1180,
                name: "Test Tablet".to_string(),
            },
        ),
    ])
}

pub fn capture_settings() -> CaptureSettings {
    CaptureSettings {
        target_url: "http://app.test".to_string(),
        user_agent: "screen-verify-tests".to_string(),
        viewports: viewports(),
        screen_types: vec![ScreenType::AppLoad, ScreenType::ContentLoad, ScreenType::Dashboard],
        retry: RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(2_000),
            backoff: Backoff::Fixed,
        },
        attempt_timeout: Duration::from_secs(30),
        max_concurrency: 2,
    }
}

pub fn wait_settings() -> WaitSettings {
    WaitSettings {
        poll_interval: POLL_INTERVAL,
        backoff: Backoff::Fixed,
        auto_approve_threshold: 0.8,
    }
}

pub fn spec() -> TaskSpec {
    TaskSpec {
        name: Some("nightly smoke".to_string()),
        ..TaskSpec::default()
    }
}

pub fn human(approved: bool) -> ReviewVerdict {
    ReviewVerdict {
        approved,
        comments: Some(if approved { "Looks good" } else { "Dashboard is empty" }.to_string()),
        ..ReviewVerdict::default()
    }
}

pub fn automated(approved: bool, confidence: f64) -> ReviewVerdict {
    ReviewVerdict {
        approved,
        confidence: Some(confidence),
        analysis: Some("Layout consistent across viewports".to_string()),
        ..ReviewVerdict::default()
    }
}

pub fn response(human_review: ReviewVerdict, automated_review: ReviewVerdict) -> ReviewResponse {
    ReviewResponse {
        human_review: Some(human_review),
        automated_review: Some(automated_review),
    }
}

pub fn approve_both() -> ReviewResponse {
    response(human(true), automated(true, 0.95))
}
