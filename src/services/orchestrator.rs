//! End-to-end verification workflow:
//! create → capture → request review → wait → finalize.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::models::record_id;
use crate::models::review::{ReviewRequest, ReviewResponse, ReviewStatus, ReviewerType};
use crate::models::summary::Summary;
use crate::models::task::{
    review_step_name, StepStatus, TaskSpec, TaskStatus, VerificationTask, STEP_SCREEN_CAPTURE,
};
use crate::services::capture::CaptureService;
use crate::services::clock::Clock;
use crate::services::review::{ReviewError, ReviewRequestFactory};
use crate::services::summary::{render_markdown, SummaryAggregator};
use crate::services::waiter::{ApprovalOutcome, ApprovalWaiter, WaitError, WaitSettings};
use crate::store::{StoreError, TaskStore};

/// Result of a full or resumed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub task: VerificationTask,
    pub summary: Summary,
}

/// What happened to a reviewer response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResponseOutcome {
    /// `already_answered` lists reviewers whose earlier answer was kept.
    Recorded {
        requests: Vec<ReviewRequest>,
        already_answered: Vec<ReviewerType>,
    },
    Ignored { reason: IgnoreReason },
}

/// Why a response changed nothing. First answer wins.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IgnoreReason {
    TaskFinalized { status: TaskStatus },
    AlreadyAnswered,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskFinalized { status } => write!(f, "task already finalized as {status}"),
            Self::AlreadyAnswered => f.write_str("reviewers already answered"),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    capture: CaptureService,
    reviews: ReviewRequestFactory,
    waiter: ApprovalWaiter,
    aggregator: SummaryAggregator,
    clock: Arc<dyn Clock>,
    review_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        capture: CaptureService,
        clock: Arc<dyn Clock>,
        wait_settings: WaitSettings,
        review_timeout: Duration,
    ) -> Self {
        Self {
            reviews: ReviewRequestFactory::new(store.clone(), clock.clone()),
            waiter: ApprovalWaiter::new(store.clone(), clock.clone(), wait_settings),
            aggregator: SummaryAggregator::new(clock.clone()),
            store,
            capture,
            clock,
            review_timeout,
        }
    }

    /// Make waits stop when `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.waiter = self.waiter.with_shutdown(shutdown);
        self
    }

    pub fn capture_service(&self) -> &CaptureService {
        &self.capture
    }

    /// Create and persist a new pending task.
    pub async fn create_task(&self, spec: TaskSpec) -> Result<VerificationTask, WorkflowError> {
        let configured = &self.capture.settings().viewports;
        if let Some(unknown) = spec.viewports.iter().find(|v| !configured.contains_key(*v)) {
            return Err(WorkflowError::InvalidSpec(format!("unknown viewport: {unknown}")));
        }

        let now = self.clock.now();
        let task = VerificationTask::new(record_id("verification", now), now, spec);
        self.store.put(&task).await?;

        metrics::counter!("verification_tasks_created_total").increment(1);
        tracing::info!(task_id = %task.id, "Verification task created");
        Ok(task)
    }

    /// Capture screens and issue both review requests. Leaves the task
    /// `verification-pending`.
    pub async fn execute_workflow(&self, task_id: &str) -> Result<VerificationTask, WorkflowError> {
        let mut task = self.load(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(WorkflowError::InvalidState {
                id: task.id,
                status: task.status,
            });
        }

        tracing::info!(task_id = %task.id, "Step 1: capturing screens");
        let capture = match task.spec.target_url.as_deref() {
            Some(url) => self.capture.for_target(url),
            None => self.capture.clone(),
        };
        let report = capture
            .capture_all(&task.spec.viewports, &task.spec.screen_types)
            .await;

        if report.summary.failed > 0 {
            tracing::warn!(
                task_id = %task.id,
                failed = report.summary.failed,
                "Some captures failed, proceeding with review"
            );
        }
        if let Some(step) = task.step_mut(STEP_SCREEN_CAPTURE) {
            step.status = if report.summary.failed == 0 {
                StepStatus::Completed
            } else {
                StepStatus::Failed
            };
            step.result = Some(serde_json::to_value(&report).map_err(StoreError::from)?);
        }
        task.results.insert(
            "screen_capture".to_string(),
            serde_json::to_value(report.summary).map_err(StoreError::from)?,
        );
        self.store.put(&task).await?;

        let timeout = self.timeout_for(&task, None);
        for reviewer in [ReviewerType::Human, ReviewerType::Automated] {
            tracing::info!(task_id = %task.id, reviewer = %reviewer, "Step 2: requesting review");
            let request = self
                .reviews
                .generate(&task.id, &report, reviewer, timeout)
                .await?;
            task.results.insert(
                format!("{}_request", review_step_name(reviewer).replace('-', "_")),
                serde_json::Value::String(request.id.clone()),
            );
            if let Some(step) = task.step_mut(review_step_name(reviewer)) {
                step.status = StepStatus::Pending;
                step.request_id = Some(request.id);
            }
        }

        task.status = TaskStatus::VerificationPending;
        self.store.put(&task).await?;
        tracing::info!(task_id = %task.id, "Review requested; awaiting reviewers");
        Ok(task)
    }

    /// Wait for both reviewers. `None` uses the task's or the configured timeout.
    pub async fn wait_for_approval(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        let task = self.load(task_id).await?;
        let timeout = self.timeout_for(&task, timeout);
        Ok(self.waiter.wait(task_id, timeout).await?)
    }

    /// Wait for both reviewers until an absolute deadline. Answers recorded
    /// by then count even when the deadline has already passed.
    pub async fn wait_until(
        &self,
        task_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        Ok(self.waiter.wait_until(task_id, deadline).await?)
    }

    /// Aggregate, set the final status and persist task and summary.
    ///
    /// An already archived task returns its stored summary unchanged.
    pub async fn finalize(
        &self,
        outcome: ApprovalOutcome,
    ) -> Result<(VerificationTask, Summary), WorkflowError> {
        let mut task = outcome.task;
        if let Some(summary_id) = task.summary_id.clone() {
            let summary = self
                .store
                .get_summary(&summary_id)
                .await?
                .ok_or_else(|| WorkflowError::SummaryNotFound(summary_id.clone()))?;
            return Ok((task, summary));
        }

        task.status = if outcome.timed_out {
            TaskStatus::Timeout
        } else if outcome.approved {
            TaskStatus::Approved
        } else {
            TaskStatus::Rejected
        };
        task.completed_at = Some(self.clock.now());

        let summary = self.aggregator.aggregate(&task);
        task.summary_id = Some(summary.id.clone());

        // Summary first: a task pointing at a missing summary is never observable.
        self.store
            .put_summary(&summary, &render_markdown(&summary))
            .await?;
        self.store.put(&task).await?;

        metrics::counter!(
            "verification_runs_total",
            "result" => summary.overall_result.to_string()
        )
        .increment(1);
        tracing::info!(
            task_id = %task.id,
            status = %task.status,
            result = %summary.overall_result,
            summary_id = %summary.id,
            "Verification finalized"
        );
        Ok((task, summary))
    }

    /// Wait for approval and finalize.
    pub async fn resume(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<RunOutcome, WorkflowError> {
        let outcome = self.wait_for_approval(task_id, timeout).await?;
        self.conclude(outcome).await
    }

    /// Wait for approval until `deadline` and finalize.
    pub async fn resume_until(
        &self,
        task_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<RunOutcome, WorkflowError> {
        let outcome = self.wait_until(task_id, deadline).await?;
        self.conclude(outcome).await
    }

    async fn conclude(&self, outcome: ApprovalOutcome) -> Result<RunOutcome, WorkflowError> {
        let (task, summary) = self.finalize(outcome).await?;
        Ok(RunOutcome {
            success: summary.passed(),
            task,
            summary,
        })
    }

    /// Full workflow for a new task.
    pub async fn run(&self, spec: TaskSpec) -> Result<RunOutcome, WorkflowError> {
        tracing::info!("Starting verification workflow");
        let task = self.create_task(spec).await?;
        self.execute_workflow(&task.id).await?;
        let outcome = self.resume(&task.id, None).await?;
        tracing::info!(
            task_id = %outcome.task.id,
            success = outcome.success,
            "Verification workflow completed"
        );
        Ok(outcome)
    }

    /// Record reviewer verdicts on the task's review requests.
    ///
    /// Only the request records are written; the waiter projects them into
    /// the task. Responses for finalized tasks or already answered requests
    /// are ignored.
    pub async fn process_response(
        &self,
        task_id: &str,
        response: &ReviewResponse,
    ) -> Result<ResponseOutcome, WorkflowError> {
        let task = self.load(task_id).await?;
        if task.status.is_final() {
            tracing::warn!(task_id = %task.id, status = %task.status, "Late review response ignored");
            return Ok(ResponseOutcome::Ignored {
                reason: IgnoreReason::TaskFinalized {
                    status: task.status,
                },
            });
        }

        let verdicts: Vec<_> = [ReviewerType::Human, ReviewerType::Automated]
            .into_iter()
            .filter_map(|reviewer| response.verdict(reviewer).map(|v| (reviewer, v)))
            .collect();
        for (_, verdict) in &verdicts {
            if let Some(confidence) = verdict.confidence {
                if !(0.0..=1.0).contains(&confidence) {
                    return Err(WorkflowError::InvalidResponse(format!(
                        "confidence {confidence} is outside 0..=1"
                    )));
                }
            }
        }

        let mut updated = Vec::new();
        let mut already_answered = Vec::new();
        for (reviewer, verdict) in verdicts {
            let request_id = task
                .step(review_step_name(reviewer))
                .and_then(|s| s.request_id.clone())
                .ok_or(WorkflowError::InvalidState {
                    id: task.id.clone(),
                    status: task.status,
                })?;
            let mut request = self
                .store
                .get_request(&request_id)
                .await?
                .ok_or_else(|| WorkflowError::RequestNotFound(request_id.clone()))?;
            if request.is_answered() {
                tracing::warn!(
                    task_id = %task.id,
                    request_id = %request.id,
                    reviewer = %reviewer,
                    status = %request.status,
                    "Review already answered; response ignored"
                );
                already_answered.push(reviewer);
                continue;
            }

            request.status = if verdict.approved {
                ReviewStatus::Approved
            } else {
                ReviewStatus::Rejected
            };
            request.comments.clone_from(&verdict.comments);
            request.confidence = verdict.confidence;
            request.analysis.clone_from(&verdict.analysis);
            request.responded_at = Some(self.clock.now());
            self.store.put_request(&request).await?;

            tracing::info!(
                task_id = %task.id,
                request_id = %request.id,
                reviewer = %reviewer,
                approved = verdict.approved,
                "Review response recorded"
            );
            updated.push(request);
        }

        if updated.is_empty() && !already_answered.is_empty() {
            return Ok(ResponseOutcome::Ignored {
                reason: IgnoreReason::AlreadyAnswered,
            });
        }
        Ok(ResponseOutcome::Recorded {
            requests: updated,
            already_answered,
        })
    }

    async fn load(&self, task_id: &str) -> Result<VerificationTask, WorkflowError> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| WorkflowError::TaskNotFound(task_id.to_string()))
    }

    fn timeout_for(&self, task: &VerificationTask, explicit: Option<Duration>) -> Duration {
        explicit
            .or_else(|| task.spec.review_timeout_ms.map(Duration::from_millis))
            .unwrap_or(self.review_timeout)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Review request generation failed: {0}")]
    RequestGeneration(#[from] ReviewError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Review request not found: {0}")]
    RequestNotFound(String),

    #[error("Summary not found: {0}")]
    SummaryNotFound(String),

    #[error("Invalid task spec: {0}")]
    InvalidSpec(String),

    #[error("Task {id} is {status}; operation not allowed")]
    InvalidState { id: String, status: TaskStatus },

    #[error("Invalid review response: {0}")]
    InvalidResponse(String),

    #[error("Verification cancelled")]
    Cancelled,
}

impl From<WaitError> for WorkflowError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Store(e) => Self::Store(e),
            WaitError::TaskNotFound(id) => Self::TaskNotFound(id),
            WaitError::Cancelled => Self::Cancelled,
        }
    }
}

impl WorkflowError {
    /// Stable machine-readable error kind for CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(StoreError::Corruption { .. }) => "store_corruption",
            Self::Store(StoreError::InvalidId(_)) => "invalid_id",
            Self::Store(_) => "store_error",
            Self::RequestGeneration(_) => "request_generation_failure",
            Self::TaskNotFound(_) => "task_not_found",
            Self::RequestNotFound(_) => "request_not_found",
            Self::SummaryNotFound(_) => "summary_not_found",
            Self::InvalidSpec(_) => "invalid_spec",
            Self::InvalidState { .. } => "invalid_state",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Cancelled => "cancelled",
        }
    }
}
