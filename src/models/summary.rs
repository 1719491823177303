use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::capture::CaptureCounts;
use crate::models::review::ReviewStatus;
use crate::models::task::{StepStatus, TaskStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum OverallResult {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepBreakdown {
    pub name: String,
    pub status: StepStatus,
    pub required: bool,
    pub description: String,
}

/// What a reviewer said, as far as the task knows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewerBlock {
    pub step_status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_status: Option<ReviewStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Final verdict for a task. Derived from the task record, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub id: String,
    pub task_id: String,
    pub generated_at: DateTime<Utc>,
    pub task_status: TaskStatus,
    pub overall_result: OverallResult,
    pub timed_out: bool,
    pub steps: Vec<StepBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_capture: Option<CaptureCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_review: Option<ReviewerBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated_review: Option<ReviewerBlock>,
    pub counts: StepCounts,
}

impl Summary {
    pub fn passed(&self) -> bool {
        self.overall_result == OverallResult::Passed
    }
}
