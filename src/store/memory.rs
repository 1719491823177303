use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, RwLock};

use crate::models::review::ReviewRequest;
use crate::models::summary::Summary;
use crate::models::task::{TaskStatus, VerificationTask};
use crate::store::{
    decode, event_channel, validate_id, RecordKind, StoreError, StoreEvent, TaskStore,
};

/// In-process store. Records are kept as serialized JSON so reads go
/// through the same decode path as the file store.
pub struct MemoryStore {
    tasks: RwLock<HashMap<String, String>>,
    requests: RwLock<HashMap<String, String>>,
    summaries: RwLock<HashMap<String, (String, String)>>,
    quarantined: RwLock<HashSet<String>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            requests: RwLock::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
            quarantined: RwLock::new(HashSet::new()),
            events: event_channel(),
        }
    }

    /// Store raw text as a task record, bypassing serialization.
    pub async fn put_raw_task(&self, id: &str, raw: &str) {
        self.tasks
            .write()
            .await
            .insert(id.to_string(), raw.to_string());
    }

    /// Store raw text as a review request record, bypassing serialization.
    pub async fn put_raw_request(&self, id: &str, raw: &str) {
        self.requests
            .write()
            .await
            .insert(id.to_string(), raw.to_string());
    }

    /// Rendered Markdown report for a stored summary.
    pub async fn summary_report(&self, summary_id: &str) -> Option<String> {
        self.summaries
            .read()
            .await
            .get(summary_id)
            .map(|(_, report)| report.clone())
    }

    pub async fn is_quarantined(&self, id: &str) -> bool {
        self.quarantined.read().await.contains(id)
    }

    /// Drop a corrupt record so later reads see it as missing.
    async fn quarantine(&self, kind: RecordKind, id: &str) {
        match kind {
            RecordKind::Task => {
                self.tasks.write().await.remove(id);
            }
            RecordKind::Request => {
                self.requests.write().await.remove(id);
            }
            RecordKind::Summary => {
                self.summaries.write().await.remove(id);
            }
        }
        self.quarantined.write().await.insert(id.to_string());
        tracing::warn!(kind = %kind, id = %id, "Quarantined corrupted record");
    }

    async fn load<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        id: &str,
        raw: Option<String>,
    ) -> Result<Option<T>, StoreError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        match decode(kind, id, &raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                self.quarantine(kind, id).await;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<VerificationTask>, StoreError> {
        validate_id(id)?;
        let raw = self.tasks.read().await.get(id).cloned();
        self.load(RecordKind::Task, id, raw).await
    }

    async fn put(&self, task: &VerificationTask) -> Result<(), StoreError> {
        validate_id(&task.id)?;
        let raw = serde_json::to_string(task)?;
        self.tasks.write().await.insert(task.id.clone(), raw);
        let _ = self.events.send(StoreEvent::TaskWritten {
            id: task.id.clone(),
        });
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<ReviewRequest>, StoreError> {
        validate_id(id)?;
        let raw = self.requests.read().await.get(id).cloned();
        self.load(RecordKind::Request, id, raw).await
    }

    async fn put_request(&self, request: &ReviewRequest) -> Result<(), StoreError> {
        validate_id(&request.id)?;
        let raw = serde_json::to_string(request)?;
        self.requests.write().await.insert(request.id.clone(), raw);
        let _ = self.events.send(StoreEvent::RequestWritten {
            id: request.id.clone(),
            task_id: request.task_id.clone(),
        });
        Ok(())
    }

    async fn put_summary(&self, summary: &Summary, report: &str) -> Result<(), StoreError> {
        validate_id(&summary.id)?;
        let raw = serde_json::to_string(summary)?;
        self.summaries
            .write()
            .await
            .insert(summary.id.clone(), (raw, report.to_string()));
        let _ = self.events.send(StoreEvent::SummaryWritten {
            id: summary.id.clone(),
            task_id: summary.task_id.clone(),
        });
        Ok(())
    }

    async fn get_summary(&self, id: &str) -> Result<Option<Summary>, StoreError> {
        validate_id(id)?;
        let raw = self.summaries.read().await.get(id).map(|(raw, _)| raw.clone());
        self.load(RecordKind::Summary, id, raw).await
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<VerificationTask>, StoreError> {
        let ids: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        let mut tasks = Vec::new();
        for id in ids {
            match self.get(&id).await {
                Ok(Some(task)) if status.map_or(true, |s| task.status == s) => tasks.push(task),
                Ok(_) | Err(StoreError::Corruption { .. }) => {}
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
