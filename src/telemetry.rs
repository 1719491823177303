//! Logging and metrics setup shared by both binaries.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::store::fs::write_atomic;

const AUDIT_LOG_FILE: &str = "verification.log";

/// Install the global subscriber: JSON on stderr, plus an append-only JSON
/// audit log under `log_dir` when set.
///
/// stdout stays free for the command's JSON result.
pub fn init_tracing(log_dir: Option<&Path>) -> Result<(), TelemetryError> {
    let audit = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| TelemetryError::LogFile {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = dir.join(AUDIT_LOG_FILE);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| TelemetryError::LogFile { path, source })?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .with(audit)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;

    metrics::describe_counter!("capture_attempts_total", "Screenshot attempts made");
    metrics::describe_counter!(
        "capture_failures_total",
        "Captures that failed after all attempts"
    );
    metrics::describe_histogram!(
        "capture_duration_seconds",
        "Time for one successful screenshot attempt"
    );
    metrics::describe_counter!(
        "verification_tasks_created_total",
        "Verification tasks created"
    );
    metrics::describe_counter!(
        "verification_runs_total",
        "Finalized verification tasks by overall result"
    );
    metrics::describe_gauge!(
        "verification_pending_tasks",
        "Tasks awaiting reviewer decisions, as last seen by the worker"
    );

    Ok(handle)
}

/// Render the current metrics to a Prometheus textfile.
pub async fn write_textfile(handle: &PrometheusHandle, path: &Path) -> Result<(), TelemetryError> {
    write_atomic(path, handle.render().as_bytes())
        .await
        .map_err(|source| TelemetryError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Cannot write {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error("Failed to install metrics recorder: {0}")]
    Metrics(String),
}
