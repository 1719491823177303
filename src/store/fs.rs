use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use crate::models::review::ReviewRequest;
use crate::models::summary::Summary;
use crate::models::task::{TaskStatus, VerificationTask};
use crate::store::{
    decode, event_channel, validate_id, RecordKind, StoreError, StoreEvent, TaskStore,
};

const QUARANTINE_SUFFIX: &str = "invalid";

/// JSON-file store: one file per record under `tasks/`, `requests/` and
/// `summaries/`. Writes go to a temp file in the same directory and are
/// renamed into place.
pub struct FsStore {
    root: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for kind in [RecordKind::Task, RecordKind::Request, RecordKind::Summary] {
            let dir = root.join(dir_name(kind));
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| StoreError::Io { path: dir, source })?;
        }
        Ok(Self {
            root,
            events: event_channel(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.root.join(dir_name(kind)).join(format!("{id}.json"))
    }

    pub fn report_path(&self, summary_id: &str) -> PathBuf {
        self.root
            .join(dir_name(RecordKind::Summary))
            .join(format!("{summary_id}.md"))
    }

    async fn read_record(&self, kind: RecordKind, id: &str) -> Result<Option<String>, StoreError> {
        validate_id(id)?;
        let path = self.record_path(kind, id);
        match fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn load<T: serde::de::DeserializeOwned>(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.read_record(kind, id).await? else {
            return Ok(None);
        };
        match decode(kind, id, &raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                self.quarantine(&self.record_path(kind, id)).await;
                Err(err)
            }
        }
    }

    async fn write_record<T: Serialize>(
        &self,
        kind: RecordKind,
        id: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        validate_id(id)?;
        let bytes = serde_json::to_vec_pretty(record)?;
        write_file(&self.record_path(kind, id), &bytes).await
    }

    /// Move a corrupt record aside so it is excluded from later reads.
    async fn quarantine(&self, path: &Path) {
        let target = path.with_extension(format!("json.{QUARANTINE_SUFFIX}"));
        match fs::rename(path, &target).await {
            Ok(()) => tracing::warn!(
                path = %path.display(),
                quarantined = %target.display(),
                "Quarantined corrupted record"
            ),
            Err(e) => tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to quarantine corrupted record"
            ),
        }
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn dir_name(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Task => "tasks",
        RecordKind::Request => "requests",
        RecordKind::Summary => "summaries",
    }
}

/// Write `bytes` to `path` via temp file + fsync + rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record");
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{name}.tmp.{}.{nanos}", std::process::id()));

    let mut file = fs::File::create(&tmp).await?;
    let written = async {
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    write_atomic(path, bytes)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl TaskStore for FsStore {
    async fn get(&self, id: &str) -> Result<Option<VerificationTask>, StoreError> {
        self.load(RecordKind::Task, id).await
    }

    async fn put(&self, task: &VerificationTask) -> Result<(), StoreError> {
        self.write_record(RecordKind::Task, &task.id, task).await?;
        self.notify(StoreEvent::TaskWritten {
            id: task.id.clone(),
        });
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<ReviewRequest>, StoreError> {
        self.load(RecordKind::Request, id).await
    }

    async fn put_request(&self, request: &ReviewRequest) -> Result<(), StoreError> {
        self.write_record(RecordKind::Request, &request.id, request)
            .await?;
        self.notify(StoreEvent::RequestWritten {
            id: request.id.clone(),
            task_id: request.task_id.clone(),
        });
        Ok(())
    }

    async fn put_summary(&self, summary: &Summary, report: &str) -> Result<(), StoreError> {
        validate_id(&summary.id)?;
        write_file(&self.report_path(&summary.id), report.as_bytes()).await?;
        self.write_record(RecordKind::Summary, &summary.id, summary)
            .await?;
        self.notify(StoreEvent::SummaryWritten {
            id: summary.id.clone(),
            task_id: summary.task_id.clone(),
        });
        Ok(())
    }

    async fn get_summary(&self, id: &str) -> Result<Option<Summary>, StoreError> {
        self.load(RecordKind::Summary, id).await
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<VerificationTask>, StoreError> {
        let dir = self.root.join(dir_name(RecordKind::Task));
        let mut entries = fs::read_dir(&dir).await.map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut tasks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            match self.get(id).await {
                Ok(Some(task)) => {
                    if status.map_or(true, |s| task.status == s) {
                        tasks.push(task);
                    }
                }
                Ok(None) => {}
                Err(StoreError::Corruption { id, reason, .. }) => {
                    tracing::warn!(task_id = %id, reason = %reason, "Skipping corrupted task");
                }
                Err(e) => return Err(e),
            }
        }

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
