//! Review request generation for the human and automated reviewers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::models::capture::CaptureReport;
use crate::models::record_id;
use crate::models::review::{ReviewRequest, ReviewStatus, ReviewerType};
use crate::services::clock::Clock;
use crate::store::{StoreError, TaskStore};

const HUMAN_INSTRUCTIONS: &[&str] = &[
    "Review the captured screenshots for visual integrity and functionality",
    "Check for proper app loading, content display, and dashboard functionality",
    "Verify no blank screens, broken layouts, or visual regressions",
    "Confirm all UI elements are visible and properly positioned",
    "Test navigation and interactive elements if possible",
    "Note any issues or concerns in the review comments",
];

const HUMAN_CRITERIA: &[(&str, &str)] = &[
    ("app_load", "App should load without errors and display initial screen"),
    ("content_load", "Content should load properly with no missing elements"),
    ("dashboard", "Dashboard should display all components correctly"),
    ("navigation", "Navigation elements should be functional"),
    ("visual_consistency", "UI should be consistent with design system"),
];

const AUTOMATED_INSTRUCTIONS: &[&str] = &[
    "Analyze the captured screenshots for visual consistency and UI integrity",
    "Check for proper component rendering and layout structure",
    "Verify navigation elements and interactive components",
    "Identify any visual regressions or broken UI elements",
    "Assess accessibility compliance and user experience",
    "Provide a confidence score between 0 and 1 and a detailed analysis",
];

const AUTOMATED_CRITERIA: &[(&str, &str)] = &[
    ("visual_consistency", "UI elements should follow consistent design patterns"),
    ("component_rendering", "All components should render correctly"),
    ("layout_structure", "Layout should be properly structured and responsive"),
    ("navigation_elements", "Navigation should be functional and accessible"),
    ("accessibility_compliance", "UI should meet accessibility standards"),
    ("user_experience", "Overall user experience should be smooth and intuitive"),
];

/// Fixed instructions for a reviewer type.
pub fn instructions(reviewer: ReviewerType) -> Vec<String> {
    let lines = match reviewer {
        ReviewerType::Human => HUMAN_INSTRUCTIONS,
        ReviewerType::Automated => AUTOMATED_INSTRUCTIONS,
    };
    lines.iter().map(|s| (*s).to_string()).collect()
}

/// Fixed acceptance criteria for a reviewer type.
pub fn criteria(reviewer: ReviewerType) -> BTreeMap<String, String> {
    let entries = match reviewer {
        ReviewerType::Human => HUMAN_CRITERIA,
        ReviewerType::Automated => AUTOMATED_CRITERIA,
    };
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub struct ReviewRequestFactory {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl ReviewRequestFactory {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Build a pending request and persist it before returning.
    pub async fn generate(
        &self,
        task_id: &str,
        captures: &CaptureReport,
        reviewer: ReviewerType,
        timeout: Duration,
    ) -> Result<ReviewRequest, ReviewError> {
        let now = self.clock.now();
        let prefix = match reviewer {
            ReviewerType::Human => "human-review",
            ReviewerType::Automated => "automated-review",
        };
        let timeout = ChronoDuration::from_std(timeout)
            .map_err(|_| ReviewError::InvalidTimeout(timeout))?;

        let request = ReviewRequest {
            id: record_id(prefix, now),
            task_id: task_id.to_string(),
            reviewer_type: reviewer,
            created_at: now,
            instructions: instructions(reviewer),
            criteria: criteria(reviewer),
            captures: captures.artifacts(),
            status: ReviewStatus::Pending,
            deadline: now + timeout,
            comments: None,
            confidence: None,
            analysis: None,
            responded_at: None,
        };

        self.store
            .put_request(&request)
            .await
            .map_err(|source| ReviewError::Persist {
                id: request.id.clone(),
                source,
            })?;

        tracing::info!(
            task_id = %task_id,
            request_id = %request.id,
            reviewer = %reviewer,
            deadline = %request.deadline,
            "Review request generated"
        );
        Ok(request)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("Failed to persist review request {id}: {source}")]
    Persist { id: String, source: StoreError },

    #[error("Review timeout out of range: {0:?}")]
    InvalidTimeout(Duration),
}
