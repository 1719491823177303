use std::fmt::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::capture::CaptureReport;
use crate::models::record_id;
use crate::models::summary::{
    OverallResult, ReviewerBlock, StepBreakdown, StepCounts, Summary,
};
use crate::models::task::{
    StepStatus, TaskStatus, VerificationTask, STEP_AUTOMATED_REVIEW, STEP_HUMAN_REVIEW,
    STEP_SCREEN_CAPTURE,
};
use crate::services::clock::Clock;

pub struct SummaryAggregator {
    clock: Arc<dyn Clock>,
}

impl SummaryAggregator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn aggregate(&self, task: &VerificationTask) -> Summary {
        aggregate(task, self.clock.now())
    }
}

/// Reduce a task to its verdict.
///
/// PASSED iff every required step ended completed/approved. Optional steps
/// are listed but never affect the verdict.
pub fn aggregate(task: &VerificationTask, generated_at: DateTime<Utc>) -> Summary {
    let overall_result = if task.required_steps_passed() {
        OverallResult::Passed
    } else {
        OverallResult::Failed
    };

    let steps = task
        .steps
        .iter()
        .map(|s| StepBreakdown {
            name: s.name.clone(),
            status: s.status,
            required: s.required,
            description: s.description.clone(),
        })
        .collect();

    let counts = StepCounts {
        total: task.steps.len(),
        completed: task.steps.iter().filter(|s| s.status.is_success()).count(),
        failed: task.steps.iter().filter(|s| s.status.is_failure()).count(),
    };

    let screen_capture = task
        .step(STEP_SCREEN_CAPTURE)
        .and_then(|s| s.result.clone())
        .and_then(|v| serde_json::from_value::<CaptureReport>(v).ok())
        .map(|report| report.summary);

    Summary {
        id: record_id("verification-summary", generated_at),
        task_id: task.id.clone(),
        generated_at,
        task_status: task.status,
        overall_result,
        timed_out: task.status == TaskStatus::Timeout,
        steps,
        screen_capture,
        human_review: reviewer_block(task, STEP_HUMAN_REVIEW),
        automated_review: reviewer_block(task, STEP_AUTOMATED_REVIEW),
        counts,
    }
}

fn reviewer_block(task: &VerificationTask, step_name: &str) -> Option<ReviewerBlock> {
    let step = task.step(step_name)?;
    let recorded = step
        .result
        .clone()
        .and_then(|v| serde_json::from_value::<ReviewerBlock>(v).ok());
    Some(recorded.unwrap_or(ReviewerBlock {
        step_status: step.status,
        request_id: step.request_id.clone(),
        review_status: None,
        comments: None,
        confidence: None,
        analysis: None,
    }))
}

fn glyph(status: StepStatus) -> &'static str {
    if status.is_success() {
        "✅"
    } else if status.is_failure() {
        "❌"
    } else {
        "⏳"
    }
}

fn review_status_line(block: Option<&ReviewerBlock>) -> &'static str {
    match block.map(|b| b.step_status) {
        Some(StepStatus::Approved | StepStatus::Completed) => "✅ Approved",
        Some(StepStatus::Rejected | StepStatus::Failed) => "❌ Rejected",
        _ => "⏳ No response",
    }
}

/// Render the Markdown report for a summary.
pub fn render_markdown(summary: &Summary) -> String {
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "# Verification Summary\n");
    let _ = writeln!(out, "**Generated**: {}  ", summary.generated_at.to_rfc3339());
    let _ = writeln!(out, "**Task ID**: {}  ", summary.task_id);
    let _ = writeln!(out, "**Status**: {}  ", summary.task_status);
    let _ = writeln!(out, "**Overall Result**: {}", summary.overall_result);

    let _ = writeln!(out, "\n## Verification Steps\n");
    for step in &summary.steps {
        let optional = if step.required { "" } else { " [optional]" };
        let _ = writeln!(
            out,
            "- {} **{}**: {} ({}){}",
            glyph(step.status),
            step.name,
            step.description,
            step.status,
            optional
        );
    }

    let _ = writeln!(out, "\n## Results Summary\n");
    let _ = writeln!(out, "### Screen Capture");
    let capture = summary.screen_capture.unwrap_or_default();
    let _ = writeln!(
        out,
        "- **Status**: {}/{} successful",
        capture.success, capture.total
    );
    let _ = writeln!(out, "- **Failed Captures**: {}", capture.failed);

    let human = summary.human_review.as_ref();
    let _ = writeln!(out, "\n### Human Review");
    let _ = writeln!(out, "- **Status**: {}", review_status_line(human));
    let _ = writeln!(
        out,
        "- **Comments**: {}",
        human
            .and_then(|b| b.comments.as_deref())
            .unwrap_or("No comments provided")
    );

    let automated = summary.automated_review.as_ref();
    let _ = writeln!(out, "\n### Automated Review");
    let _ = writeln!(out, "- **Status**: {}", review_status_line(automated));
    let _ = writeln!(
        out,
        "- **Confidence**: {}",
        automated
            .and_then(|b| b.confidence)
            .map_or_else(|| "N/A".to_string(), |c| format!("{c:.2}"))
    );
    let _ = writeln!(
        out,
        "- **Analysis**: {}",
        automated
            .and_then(|b| b.analysis.as_deref())
            .unwrap_or("No analysis provided")
    );

    let _ = writeln!(out, "\n## Metadata\n");
    let _ = writeln!(out, "- **Total Steps**: {}", summary.counts.total);
    let _ = writeln!(out, "- **Completed Steps**: {}", summary.counts.completed);
    let _ = writeln!(out, "- **Failed Steps**: {}", summary.counts.failed);
    let _ = writeln!(
        out,
        "- **Timed Out**: {}",
        if summary.timed_out { "yes" } else { "no" }
    );

    let _ = writeln!(out, "\n## Next Steps\n");
    let next = if summary.passed() {
        "✅ Verification completed successfully. Task can proceed."
    } else if summary.timed_out {
        "⏰ Verification timed out waiting for reviewers. Re-run the wait or collect the missing reviews."
    } else {
        "❌ Verification failed. Task requires review and fixes before proceeding."
    };
    let _ = writeln!(out, "{next}");

    out
}
