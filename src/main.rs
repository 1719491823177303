use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::watch;

use screen_verify::{
    app_state::AppState,
    config::AppConfig,
    models::{capture::ScreenType, review::ReviewResponse, task::TaskSpec},
    services::{
        artifacts::ArtifactError,
        orchestrator::{ResponseOutcome, RunOutcome, WorkflowError},
    },
    telemetry,
};

const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "screen-verify")]
#[command(about = "Capture screenshots and run dual-reviewer verification", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture every configured viewport and screen type
    CaptureAll {
        /// Restrict to these viewport ids (repeatable)
        #[arg(short, long)]
        viewport: Vec<String>,

        /// Restrict to these screen types (repeatable)
        #[arg(short, long)]
        screen_type: Vec<ScreenType>,
    },

    /// Run the full workflow: create, capture, request reviews, wait, finalize
    Verify {
        /// Task spec as inline JSON or a path to a JSON file
        spec: Option<String>,
    },

    /// Delete screenshots and capture reports older than the given age
    Cleanup {
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,
    },

    /// Create a pending verification task
    CreateTask {
        /// Task spec as inline JSON or a path to a JSON file
        spec: Option<String>,
    },

    /// Capture screens and issue review requests for an existing task
    ExecuteWorkflow { task_id: String },

    /// Wait for both reviewers without finalizing the task
    WaitApproval {
        task_id: String,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Record a reviewer response (inline JSON or a path to a JSON file)
    ProcessResponse { task_id: String, response: String },

    /// Wait for a pending task and finalize it
    Resume {
        task_id: String,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

/// JSON body plus the process exit code it maps to.
struct Reply {
    code: u8,
    body: Value,
}

impl Reply {
    fn new(success: bool, body: Value) -> Self {
        Self {
            code: if success { 0 } else { EXIT_FAILED },
            body,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => return emit_error(&e.to_string(), "config"),
    };

    if let Err(e) = telemetry::init_tracing(config.log_dir.as_deref()) {
        eprintln!("{e}");
    }
    let metrics = match telemetry::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping");
            let _ = shutdown_tx.send(true);
        }
    });

    let textfile = config.metrics_textfile.clone();
    let state = match AppState::build(config, shutdown_rx).await {
        Ok(state) => state,
        Err(e) => return emit_error(&e.to_string(), "startup"),
    };

    let code = match dispatch(&state, cli.command).await {
        Ok(reply) => {
            println!("{:#}", reply.body);
            ExitCode::from(reply.code)
        }
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "Command failed");
            emit_error(&e.to_string(), e.kind())
        }
    };

    if let (Some(handle), Some(path)) = (metrics.as_ref(), textfile.as_deref()) {
        if let Err(e) = telemetry::write_textfile(handle, path).await {
            tracing::warn!(error = %e, "Failed to write metrics textfile");
        }
    }

    code
}

async fn dispatch(state: &AppState, command: Commands) -> Result<Reply, CliError> {
    let orchestrator = &state.orchestrator;

    match command {
        Commands::CaptureAll {
            viewport,
            screen_type,
        } => {
            let report = orchestrator
                .capture_service()
                .capture_all(&viewport, &screen_type)
                .await;
            let success = report.summary.failed == 0;
            Ok(Reply::new(success, json!({ "success": success, "report": report })))
        }

        Commands::Verify { spec } => {
            let spec: TaskSpec = read_json_or_default(spec.as_deref())?;
            Ok(run_reply(orchestrator.run(spec).await?))
        }

        Commands::Cleanup { max_age_hours } => {
            let removed = state
                .artifacts
                .cleanup_older_than(Duration::from_secs(max_age_hours * 3600))
                .await?;
            Ok(Reply::new(true, json!({ "success": true, "removed": removed })))
        }

        Commands::CreateTask { spec } => {
            let spec: TaskSpec = read_json_or_default(spec.as_deref())?;
            let task = orchestrator.create_task(spec).await?;
            Ok(Reply::new(true, json!({ "success": true, "task": task })))
        }

        Commands::ExecuteWorkflow { task_id } => {
            let task = orchestrator.execute_workflow(&task_id).await?;
            Ok(Reply::new(true, json!({ "success": true, "task": task })))
        }

        Commands::WaitApproval {
            task_id,
            timeout_ms,
        } => {
            let outcome = orchestrator
                .wait_for_approval(&task_id, timeout_ms.map(Duration::from_millis))
                .await?;
            Ok(Reply::new(
                outcome.approved,
                json!({
                    "success": outcome.approved,
                    "approved": outcome.approved,
                    "timed_out": outcome.timed_out,
                    "task": outcome.task,
                }),
            ))
        }

        Commands::ProcessResponse { task_id, response } => {
            let response: ReviewResponse = read_json(&response)?;
            match orchestrator.process_response(&task_id, &response).await? {
                ResponseOutcome::Recorded {
                    requests,
                    already_answered,
                } => Ok(Reply::new(
                    true,
                    json!({
                        "success": true,
                        "requests": requests,
                        "already_answered": already_answered,
                    }),
                )),
                ResponseOutcome::Ignored { reason } => Ok(Reply::new(
                    false,
                    json!({
                        "success": false,
                        "ignored": true,
                        "reason": reason.to_string(),
                    }),
                )),
            }
        }

        Commands::Resume {
            task_id,
            timeout_ms,
        } => {
            let outcome = orchestrator
                .resume(&task_id, timeout_ms.map(Duration::from_millis))
                .await?;
            Ok(run_reply(outcome))
        }
    }
}

fn run_reply(outcome: RunOutcome) -> Reply {
    Reply::new(
        outcome.success,
        json!({
            "success": outcome.success,
            "task": outcome.task,
            "summary": outcome.summary,
        }),
    )
}

/// Parse an argument that is either inline JSON or a path to a JSON file.
fn read_json<T: DeserializeOwned>(arg: &str) -> Result<T, CliError> {
    let trimmed = arg.trim_start();
    let raw = if trimmed.starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(Path::new(arg))
            .map_err(|e| CliError::Input(format!("cannot read {arg}: {e}")))?
    };
    serde_json::from_str(&raw).map_err(|e| CliError::Input(format!("invalid JSON: {e}")))
}

fn read_json_or_default<T: DeserializeOwned + Default>(arg: Option<&str>) -> Result<T, CliError> {
    arg.map_or_else(|| Ok(T::default()), read_json::<T>)
}

fn emit_error(message: &str, kind: &str) -> ExitCode {
    println!(
        "{:#}",
        json!({ "success": false, "error": message, "kind": kind })
    );
    ExitCode::from(EXIT_ERROR)
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Artifacts(#[from] ArtifactError),

    #[error("Invalid input: {0}")]
    Input(String),
}

impl CliError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Workflow(e) => e.kind(),
            Self::Artifacts(_) => "artifact_error",
            Self::Input(_) => "invalid_input",
        }
    }
}
