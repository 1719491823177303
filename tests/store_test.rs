//! File-backed store: round trips, atomic layout, corruption handling.

use chrono::{Duration as ChronoDuration, Utc};
use screen_verify::models::record_id;
use screen_verify::models::review::{ReviewRequest, ReviewStatus, ReviewerType};
use screen_verify::models::task::{StepStatus, TaskSpec, TaskStatus, VerificationTask};
use screen_verify::services::review::{criteria, instructions};
use screen_verify::services::summary::{aggregate, render_markdown};
use screen_verify::store::{FsStore, RecordKind, StoreError, StoreEvent, TaskStore};
use tempfile::TempDir;
use tokio_test::assert_ok;

async fn open_store() -> (TempDir, FsStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = assert_ok!(FsStore::open(dir.path()).await);
    (dir, store)
}

fn new_task() -> VerificationTask {
    let now = Utc::now();
    VerificationTask::new(
        record_id("verification", now),
        now,
        TaskSpec {
            name: Some("store test".to_string()),
            ..TaskSpec::default()
        },
    )
}

#[tokio::test]
async fn test_task_round_trip_is_lossless() {
    let (_dir, store) = open_store().await;
    let mut task = new_task();
    task.status = TaskStatus::VerificationPending;
    task.steps[0].status = StepStatus::Completed;
    task.results
        .insert("screen_capture".to_string(), serde_json::json!({"success": 6}));

    assert_ok!(store.put(&task).await);
    let loaded = assert_ok!(store.get(&task.id).await);
    assert_eq!(loaded, Some(task.clone()));
    assert!(store.record_path(RecordKind::Task, &task.id).exists());

    // No temp files left behind by the atomic write.
    let leftovers: Vec<_> = std::fs::read_dir(store.root().join("tasks"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_request_round_trip() {
    let (_dir, store) = open_store().await;
    let task = new_task();
    let now = Utc::now();
    let request = ReviewRequest {
        id: record_id("human-review", now),
        task_id: task.id.clone(),
        reviewer_type: ReviewerType::Human,
        created_at: now,
        instructions: instructions(ReviewerType::Human),
        criteria: criteria(ReviewerType::Human),
        captures: Vec::new(),
        status: ReviewStatus::Pending,
        deadline: now + ChronoDuration::seconds(60),
        comments: None,
        confidence: None,
        analysis: None,
        responded_at: None,
    };

    let mut events = store.subscribe();
    assert_ok!(store.put_request(&request).await);
    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::RequestWritten {
            id: request.id.clone(),
            task_id: task.id.clone(),
        }
    );
    assert_eq!(assert_ok!(store.get_request(&request.id).await), Some(request));
}

#[tokio::test]
async fn test_missing_record_reads_as_none() {
    let (_dir, store) = open_store().await;
    assert_eq!(assert_ok!(store.get("verification-nope").await), None);
}

#[tokio::test]
async fn test_corrupted_record_is_quarantined() {
    let (_dir, store) = open_store().await;
    let task = new_task();
    assert_ok!(store.put(&task).await);

    let path = store.record_path(RecordKind::Task, &task.id);
    std::fs::write(&path, "{\"id\": \"truncated").unwrap();

    let err = store.get(&task.id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Corruption {
            kind: RecordKind::Task,
            ..
        }
    ));
    assert!(!path.exists());
    assert!(path.with_extension("json.invalid").exists());

    // Once quarantined the record reads as missing.
    assert_eq!(assert_ok!(store.get(&task.id).await), None);
}

#[tokio::test]
async fn test_list_tasks_filters_and_skips_corruption() {
    let (_dir, store) = open_store().await;
    let pending = {
        let mut task = new_task();
        task.status = TaskStatus::VerificationPending;
        task
    };
    let fresh = new_task();
    assert_ok!(store.put(&pending).await);
    assert_ok!(store.put(&fresh).await);
    std::fs::write(
        store.record_path(RecordKind::Task, "verification-garbage"),
        "not json",
    )
    .unwrap();

    let all = assert_ok!(store.list_tasks(None).await);
    assert_eq!(all.len(), 2);

    let only_pending = assert_ok!(store.list_tasks(Some(TaskStatus::VerificationPending)).await);
    assert_eq!(only_pending, vec![pending]);
}

#[tokio::test]
async fn test_summary_is_written_with_markdown_report() {
    let (_dir, store) = open_store().await;
    let mut task = new_task();
    task.status = TaskStatus::Timeout;
    let summary = aggregate(&task, Utc::now());

    assert_ok!(store.put_summary(&summary, &render_markdown(&summary)).await);

    let report = std::fs::read_to_string(store.report_path(&summary.id)).unwrap();
    assert!(report.contains("# Verification Summary"));
    assert!(report.contains("**Timed Out**: yes"));
    assert!(store.record_path(RecordKind::Summary, &summary.id).exists());
    assert_eq!(assert_ok!(store.get_summary(&summary.id).await), Some(summary));
}

#[tokio::test]
async fn test_corrupted_summary_is_quarantined() {
    let (_dir, store) = open_store().await;
    let summary = aggregate(&new_task(), Utc::now());
    assert_ok!(store.put_summary(&summary, &render_markdown(&summary)).await);

    let path = store.record_path(RecordKind::Summary, &summary.id);
    std::fs::write(&path, "{").unwrap();

    let err = store.get_summary(&summary.id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Corruption {
            kind: RecordKind::Summary,
            ..
        }
    ));
    assert_eq!(assert_ok!(store.get_summary(&summary.id).await), None);
}

#[tokio::test]
async fn test_path_like_ids_are_refused() {
    let (_dir, store) = open_store().await;
    let err = store.get("../escape").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidId(_)));
}
