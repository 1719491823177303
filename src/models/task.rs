use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::capture::ScreenType;
use crate::models::review::ReviewerType;

/// Step names, in the order the workflow creates them.
pub const STEP_SCREEN_CAPTURE: &str = "screen-capture";
pub const STEP_HUMAN_REVIEW: &str = "human-review";
pub const STEP_AUTOMATED_REVIEW: &str = "automated-review";

/// Status of a verification task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    VerificationPending,
    Approved,
    Rejected,
    Timeout,
}

impl TaskStatus {
    /// Approved, rejected and timed-out tasks are never mutated again.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Timeout)
    }
}

/// Status of a single verification step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    Completed,
    Approved,
    Rejected,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::Approved)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Rejected | Self::Failed)
    }
}

/// One named phase within a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationStep {
    pub name: String,
    pub status: StepStatus,
    pub required: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl VerificationStep {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Pending,
            required: true,
            description: description.to_string(),
            request_id: None,
            result: None,
        }
    }
}

/// Caller-supplied description of what to verify.
///
/// Empty `viewports` / `screen_types` mean "everything configured".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub viewports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screen_types: Vec<ScreenType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_timeout_ms: Option<u64>,
    /// Free-form context carried into the task record.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

/// The unit of work tracking one capture-and-review cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationTask {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub spec: TaskSpec,
    pub steps: Vec<VerificationStep>,
    #[serde(default)]
    pub results: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_id: Option<String>,
}

impl VerificationTask {
    /// New task with the three required steps, all pending.
    pub fn new(id: String, created_at: DateTime<Utc>, spec: TaskSpec) -> Self {
        Self {
            id,
            created_at,
            status: TaskStatus::Pending,
            spec,
            steps: vec![
                VerificationStep::new(
                    STEP_SCREEN_CAPTURE,
                    "Capture app load, content load, and dashboard screens",
                ),
                VerificationStep::new(
                    STEP_HUMAN_REVIEW,
                    "Human review of captured screenshots",
                ),
                VerificationStep::new(
                    STEP_AUTOMATED_REVIEW,
                    "Automated analysis of UI integrity and layout",
                ),
            ],
            results: BTreeMap::new(),
            completed_at: None,
            summary_id: None,
        }
    }

    pub fn step(&self, name: &str) -> Option<&VerificationStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut VerificationStep> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    /// True once every required step has left `pending`.
    pub fn required_steps_terminal(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| s.required)
            .all(|s| s.status.is_terminal())
    }

    /// True when every required step ended in completed/approved.
    pub fn required_steps_passed(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| s.required)
            .all(|s| s.status.is_success())
    }

    /// A task with a persisted summary is archived.
    pub fn is_archived(&self) -> bool {
        self.summary_id.is_some()
    }
}

/// Name of the step a reviewer type owns.
pub fn review_step_name(reviewer: ReviewerType) -> &'static str {
    match reviewer {
        ReviewerType::Human => STEP_HUMAN_REVIEW,
        ReviewerType::Automated => STEP_AUTOMATED_REVIEW,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> VerificationTask {
        VerificationTask::new("verification-test".to_string(), Utc::now(), TaskSpec::default())
    }

    #[test]
    fn test_new_task_has_three_required_pending_steps() {
        let task = sample_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.steps.len(), 3);
        assert!(task.steps.iter().all(|s| s.required && s.status == StepStatus::Pending));
        assert!(!task.required_steps_terminal());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StepStatus::Pending.is_terminal());
        for status in [
            StepStatus::Completed,
            StepStatus::Approved,
            StepStatus::Rejected,
            StepStatus::Failed,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_status_strings_are_kebab_case() {
        assert_eq!(TaskStatus::VerificationPending.to_string(), "verification-pending");
        assert_eq!(
            "verification-pending".parse::<TaskStatus>().unwrap(),
            TaskStatus::VerificationPending
        );
        let json = serde_json::to_string(&TaskStatus::VerificationPending).unwrap();
        assert_eq!(json, "\"verification-pending\"");
    }

    #[test]
    fn test_non_required_step_does_not_gate_pass() {
        let mut task = sample_task();
        for step in &mut task.steps {
            step.status = StepStatus::Approved;
        }
        let mut optional = VerificationStep::new("performance", "Optional perf check");
        optional.required = false;
        optional.status = StepStatus::Failed;
        task.steps.push(optional);
        assert!(task.required_steps_passed());
    }
}
