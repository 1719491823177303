//! Bounded waiting for reviewer decisions.
//!
//! The waiter is the only component that moves review steps out of
//! `pending`: each cycle it reads the task's review requests and projects
//! answered ones into the matching steps. Polling is bounded by a deadline;
//! in-process store events wake it early.
//!
//! The deadline is also stamped in wall-clock time. Answers recorded at or
//! before it count even when they are first seen on the final poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::models::review::{ReviewRequest, ReviewStatus, ReviewerType};
use crate::models::summary::ReviewerBlock;
use crate::models::task::{review_step_name, StepStatus, TaskStatus, VerificationTask};
use crate::services::clock::Clock;
use crate::services::retry::Backoff;
use crate::store::{StoreError, StoreEvent, TaskStore};

#[derive(Debug, Clone, Copy)]
pub struct WaitSettings {
    pub poll_interval: Duration,
    pub backoff: Backoff,
    pub auto_approve_threshold: f64,
}

impl WaitSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            backoff: config.poll_backoff(),
            auto_approve_threshold: config.auto_approve_threshold,
        }
    }
}

/// Result of waiting on a task.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub approved: bool,
    pub timed_out: bool,
    pub task: VerificationTask,
}

#[derive(Clone)]
pub struct ApprovalWaiter {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    settings: WaitSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ApprovalWaiter {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, settings: WaitSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            shutdown: None,
        }
    }

    /// Stop waiting (with [`WaitError::Cancelled`]) once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Wait until every required step is terminal or `timeout` elapses,
    /// whichever happens first.
    pub async fn wait(&self, task_id: &str, timeout: Duration) -> Result<ApprovalOutcome, WaitError> {
        let now = self.clock.now();
        let cutoff = ChronoDuration::from_std(timeout)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.wait_inner(task_id, timeout, cutoff).await
    }

    /// Like [`wait`](Self::wait), bounded by an absolute deadline. A deadline
    /// already in the past still gets one poll for answers recorded in time.
    pub async fn wait_until(
        &self,
        task_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, WaitError> {
        let timeout = (deadline - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.wait_inner(task_id, timeout, deadline).await
    }

    async fn wait_inner(
        &self,
        task_id: &str,
        timeout: Duration,
        cutoff: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, WaitError> {
        tracing::info!(
            task_id = %task_id,
            timeout_ms = timeout.as_millis() as u64,
            deadline = %cutoff,
            "Waiting for verification approval"
        );

        let deadline = Instant::now() + timeout;
        let mut events = self.store.subscribe();
        let mut shutdown = self.shutdown.clone();
        let mut polls: u32 = 0;

        loop {
            let expired = Instant::now() >= deadline;
            let mut task = self
                .store
                .get(task_id)
                .await?
                .ok_or_else(|| WaitError::TaskNotFound(task_id.to_string()))?;

            if task.status.is_final() {
                tracing::info!(task_id = %task_id, status = %task.status, "Task already finalized");
                return Ok(ApprovalOutcome {
                    approved: task.status == TaskStatus::Approved,
                    timed_out: task.status == TaskStatus::Timeout,
                    task,
                });
            }

            if self.sync_reviews(&mut task, cutoff).await? {
                self.store.put(&task).await?;
            }

            if task.required_steps_terminal() {
                let approved = task.required_steps_passed();
                if approved {
                    tracing::info!(task_id = %task_id, "All verification steps completed");
                } else {
                    tracing::warn!(task_id = %task_id, "Some verification steps failed");
                }
                return Ok(ApprovalOutcome {
                    approved,
                    timed_out: false,
                    task,
                });
            }

            let now = Instant::now();
            if expired || now >= deadline {
                tracing::warn!(task_id = %task_id, "Verification timeout");
                return Ok(ApprovalOutcome {
                    approved: false,
                    timed_out: true,
                    task,
                });
            }

            let pause = self
                .settings
                .backoff
                .delay(self.settings.poll_interval, polls)
                .min(deadline - now);
            polls = polls.saturating_add(1);

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = next_event_for(&mut events, task_id) => {}
                () = cancelled(&mut shutdown) => {
                    tracing::warn!(task_id = %task_id, "Wait cancelled; task left pending");
                    return Err(WaitError::Cancelled);
                }
            }
        }
    }

    /// Copy answered review requests into pending review steps. Answers
    /// recorded after `cutoff` are left out. Returns whether the task changed.
    async fn sync_reviews(
        &self,
        task: &mut VerificationTask,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut changed = false;

        for reviewer in [ReviewerType::Human, ReviewerType::Automated] {
            let Some(step) = task.step(review_step_name(reviewer)) else {
                continue;
            };
            if step.status.is_terminal() {
                continue;
            }
            let Some(request_id) = step.request_id.clone() else {
                continue;
            };
            let Some(request) = self.store.get_request(&request_id).await? else {
                tracing::warn!(task_id = %task.id, request_id = %request_id, "Review request missing");
                continue;
            };
            if !request.is_answered() {
                continue;
            }
            if let Some(responded_at) = request.responded_at.filter(|at| *at > cutoff) {
                tracing::warn!(
                    task_id = %task.id,
                    request_id = %request.id,
                    responded_at = %responded_at,
                    deadline = %cutoff,
                    "Review answered after deadline; ignored"
                );
                continue;
            }

            let status = self.project(&request);
            let block = ReviewerBlock {
                step_status: status,
                request_id: Some(request.id.clone()),
                review_status: Some(request.status),
                comments: request.comments.clone(),
                confidence: request.confidence,
                analysis: request.analysis.clone(),
            };

            if let Some(step) = task.step_mut(review_step_name(reviewer)) {
                step.status = status;
                step.result = serde_json::to_value(&block).ok();
            }
            tracing::info!(
                task_id = %task.id,
                reviewer = %reviewer,
                status = %status,
                "Review decision applied to step"
            );
            changed = true;
        }

        Ok(changed)
    }

    /// Map a reviewer's answer onto a step status.
    fn project(&self, request: &ReviewRequest) -> StepStatus {
        match (request.reviewer_type, request.status) {
            (_, ReviewStatus::Rejected) => StepStatus::Rejected,
            (ReviewerType::Automated, ReviewStatus::Approved) => match request.confidence {
                Some(confidence) if confidence < self.settings.auto_approve_threshold => {
                    tracing::warn!(
                        request_id = %request.id,
                        confidence,
                        threshold = self.settings.auto_approve_threshold,
                        "Automated approval below confidence threshold"
                    );
                    StepStatus::Rejected
                }
                _ => StepStatus::Approved,
            },
            (_, ReviewStatus::Approved) => StepStatus::Approved,
            (_, ReviewStatus::Pending) => StepStatus::Pending,
        }
    }
}

async fn next_event_for(events: &mut broadcast::Receiver<StoreEvent>, task_id: &str) {
    loop {
        match events.recv().await {
            Ok(event) if event.task_id() == task_id => return,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

async fn cancelled(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => {
            if rx.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Wait cancelled")]
    Cancelled,
}
