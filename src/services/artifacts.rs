use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;

use crate::models::capture::{ArtifactRef, CaptureReport};
use crate::store::fs::write_atomic;

/// Local directory holding screenshots and capture reports.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| ArtifactError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save screenshot bytes under `filename`.
    pub async fn save_screenshot(
        &self,
        filename: &str,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<ArtifactRef, ArtifactError> {
        let path = self.dir.join(filename);
        write_atomic(&path, data)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(ArtifactRef {
            path: path.display().to_string(),
            filename: filename.to_string(),
            width,
            height,
        })
    }

    /// Save a capture report as `capture-report-<timestamp>.json`.
    pub async fn save_report(&self, report: &CaptureReport) -> Result<PathBuf, ArtifactError> {
        let stamp = report.timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let path = self.dir.join(format!("capture-report-{stamp}.json"));
        let bytes = serde_json::to_vec_pretty(report)?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Delete files last modified more than `max_age` ago. Returns how many
    /// were removed.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> Result<usize, ArtifactError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ArtifactError::Io { path, source }
        };

        let now = SystemTime::now();
        let mut entries = fs::read_dir(&self.dir).await.map_err(io_err(&self.dir))?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.dir))? {
            let path = entry.path();
            let meta = entry.metadata().await.map_err(io_err(&path))?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_err(io_err(&path))?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                fs::remove_file(&path).await.map_err(io_err(&path))?;
                removed += 1;
            }
        }

        tracing::info!(removed, dir = %self.dir.display(), "Cleaned up old captures");
        Ok(removed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact I/O failed on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
