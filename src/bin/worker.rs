use std::process::ExitCode;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use screen_verify::{
    app_state::AppState,
    config::AppConfig,
    models::task::{TaskStatus, VerificationTask},
    services::orchestrator::WorkflowError,
    telemetry,
};
use tokio::sync::watch;
use tokio::time::sleep;

const MAX_IN_FLIGHT: usize = 16;
const IDLE_POLL_MS: u64 = 5000;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = telemetry::init_tracing(config.log_dir.as_deref()) {
        eprintln!("{e}");
    }
    let metrics = telemetry::init_metrics()
        .map_err(|e| tracing::warn!(error = %e, "Metrics disabled"))
        .ok();

    tracing::info!("Starting verification worker");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, draining worker");
            let _ = shutdown_tx.send(true);
        }
    });

    let textfile = config.metrics_textfile.clone();
    let state = match AppState::build(config, shutdown_rx.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Worker startup failed");
            return ExitCode::from(2);
        }
    };

    tracing::info!("Worker ready, watching for pending verifications");

    while !*shutdown_rx.borrow() {
        match resume_pending(&state).await {
            Ok(0) => {
                tracing::trace!("No pending tasks, sleeping");
            }
            Ok(count) => {
                tracing::debug!(count, "Pending tasks processed");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list pending tasks, will retry");
            }
        }

        if let (Some(handle), Some(path)) = (metrics.as_ref(), textfile.as_deref()) {
            if let Err(e) = telemetry::write_textfile(handle, path).await {
                tracing::warn!(error = %e, "Failed to write metrics textfile");
            }
        }

        tokio::select! {
            () = sleep(Duration::from_millis(IDLE_POLL_MS)) => {}
            _ = shutdown_rx.wait_for(|stop| *stop) => {}
        }
    }

    tracing::info!("Worker stopped");
    ExitCode::SUCCESS
}

/// Resume every `verification-pending` task. Returns how many were seen.
async fn resume_pending(state: &AppState) -> Result<usize, WorkflowError> {
    let pending = state
        .store
        .list_tasks(Some(TaskStatus::VerificationPending))
        .await?;
    metrics::gauge!("verification_pending_tasks").set(pending.len() as f64);
    let count = pending.len();

    stream::iter(pending)
        .for_each_concurrent(MAX_IN_FLIGHT, |task| async move {
            let deadline = review_deadline(state, &task).await;
            match state.orchestrator.resume_until(&task.id, deadline).await {
                Ok(outcome) => tracing::info!(
                    task_id = %task.id,
                    success = outcome.success,
                    status = %outcome.task.status,
                    "Pending task finalized"
                ),
                Err(WorkflowError::Cancelled) => {
                    tracing::info!(task_id = %task.id, "Resume cancelled; task left pending");
                }
                Err(e) => tracing::error!(task_id = %task.id, error = %e, "Resume failed"),
            }
        })
        .await;

    Ok(count)
}

/// Earliest deadline among the review requests of `task`. Answers stamped
/// at or before it still count when the worker resumes late. Tasks without
/// readable requests get the configured review timeout from now.
async fn review_deadline(state: &AppState, task: &VerificationTask) -> DateTime<Utc> {
    let mut earliest = None;
    for request_id in task.steps.iter().filter_map(|s| s.request_id.as_deref()) {
        match state.store.get_request(request_id).await {
            Ok(Some(request)) => {
                earliest = Some(earliest.map_or(request.deadline, |d: DateTime<Utc>| {
                    d.min(request.deadline)
                }));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(task_id = %task.id, request_id, error = %e, "Unreadable review request");
            }
        }
    }

    earliest.unwrap_or_else(|| {
        let now = Utc::now();
        ChronoDuration::from_std(state.config.review_timeout())
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}
