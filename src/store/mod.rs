//! Durable keyed storage for tasks, review requests and summaries.
//!
//! Every write replaces a whole record atomically; readers never see a
//! half-written record. A record that fails to deserialize is quarantined and
//! reported as [`StoreError::Corruption`]; afterwards it reads as missing.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use strum::Display;
use tokio::sync::broadcast;

use crate::models::review::ReviewRequest;
use crate::models::summary::Summary;
use crate::models::task::{TaskStatus, VerificationTask};

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

const EVENT_CAPACITY: usize = 64;

/// Change notification emitted after a successful write.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    TaskWritten { id: String },
    RequestWritten { id: String, task_id: String },
    SummaryWritten { id: String, task_id: String },
}

impl StoreEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskWritten { id } => id,
            Self::RequestWritten { task_id, .. } | Self::SummaryWritten { task_id, .. } => task_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum RecordKind {
    Task,
    Request,
    Summary,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<VerificationTask>, StoreError>;

    async fn put(&self, task: &VerificationTask) -> Result<(), StoreError>;

    async fn get_request(&self, id: &str) -> Result<Option<ReviewRequest>, StoreError>;

    async fn put_request(&self, request: &ReviewRequest) -> Result<(), StoreError>;

    /// Persist a summary alongside its rendered Markdown report.
    async fn put_summary(&self, summary: &Summary, report: &str) -> Result<(), StoreError>;

    async fn get_summary(&self, id: &str) -> Result<Option<Summary>, StoreError>;

    /// All readable tasks, oldest first, optionally filtered by status.
    /// Corrupted records are quarantined and skipped.
    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<VerificationTask>, StoreError>;

    /// In-process change notifications. Writes from other processes are
    /// only visible by re-reading.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

pub(crate) fn event_channel() -> broadcast::Sender<StoreEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Ids become filenames, so path syntax is refused.
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    let bad = id.is_empty()
        || id.len() > 200
        || id.contains(['/', '\\'])
        || id.contains("..")
        || id.chars().any(char::is_control);
    if bad {
        Err(StoreError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}

pub(crate) fn decode<T: DeserializeOwned>(
    kind: RecordKind,
    id: &str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corruption {
        kind,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupted {kind} record {id}: {reason}")]
    Corruption {
        kind: RecordKind,
        id: String,
        reason: String,
    },

    #[error("Invalid record id: {0:?}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("verification-2026-10-18T09-30-12-123Z-1a2b3c4d").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc/passwd").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("a\\b").is_err());
    }

    #[test]
    fn test_decode_failure_is_corruption() {
        let err = decode::<VerificationTask>(RecordKind::Task, "t1", "{not json").unwrap_err();
        assert!(matches!(
            err,
            StoreError::Corruption { kind: RecordKind::Task, ref id, .. } if id == "t1"
        ));
    }
}
