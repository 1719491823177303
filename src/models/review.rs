use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::capture::ArtifactRef;

/// Who is asked to review the captures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReviewerType {
    Human,
    Automated,
}

/// Reviewer decision recorded on a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

/// Structured request asking one reviewer to approve or reject a task.
///
/// Written once by the workflow; afterwards only the reviewer updates
/// `status`, `comments`, `confidence`, `analysis` and `responded_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewRequest {
    pub id: String,
    pub task_id: String,
    pub reviewer_type: ReviewerType,
    pub created_at: DateTime<Utc>,
    pub instructions: Vec<String>,
    pub criteria: BTreeMap<String, String>,
    #[serde(default)]
    pub captures: Vec<ArtifactRef>,
    pub status: ReviewStatus,
    pub deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl ReviewRequest {
    pub fn is_answered(&self) -> bool {
        self.status != ReviewStatus::Pending
    }
}

/// One reviewer's verdict as submitted through `process-response`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewVerdict {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// Reviewer response payload; either side may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewResponse {
    #[serde(default, alias = "humanReview", skip_serializing_if = "Option::is_none")]
    pub human_review: Option<ReviewVerdict>,
    #[serde(
        default,
        alias = "automatedReview",
        alias = "gptAnalysis",
        skip_serializing_if = "Option::is_none"
    )]
    pub automated_review: Option<ReviewVerdict>,
}

impl ReviewResponse {
    pub fn verdict(&self, reviewer: ReviewerType) -> Option<&ReviewVerdict> {
        match reviewer {
            ReviewerType::Human => self.human_review.as_ref(),
            ReviewerType::Automated => self.automated_review.as_ref(),
        }
    }
}
