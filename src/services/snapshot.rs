//! Schedule snapshot store
//!
//! Persists schedule snapshots as JSON documents under day/mode-scoped
//! keys in a configured directory. Doubles as the default save/publish
//! sink: publishing stores the snapshot under the "published" mode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::services::workspace::ScheduleSink;
use crate::types::ScheduleData;

pub struct SnapshotStore {
    dir: PathBuf,
}

/// File-name-safe rendition of a key component.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn key(day: &str, mode: &str) -> String {
        format!("{}_{}", sanitize(day), sanitize(mode))
    }

    fn path_for(&self, day: &str, mode: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(day, mode)))
    }

    pub async fn save(&self, data: &ScheduleData) -> Result<()> {
        self.save_as(data, &data.mode).await
    }

    async fn save_as(&self, data: &ScheduleData, mode: &str) -> Result<()> {
        let path = self.path_for(&data.day, mode);
        let json = serde_json::to_vec_pretty(data).context("Failed to serialize snapshot")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        info!("Snapshot saved: {}", path.display());
        Ok(())
    }

    pub async fn load(&self, day: &str, mode: &str) -> Result<Option<ScheduleData>> {
        let path = self.path_for(day, mode);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read snapshot {}", path.display()))
            }
        };
        let data = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        Ok(Some(data))
    }

    /// Saved snapshot keys, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ScheduleSink for SnapshotStore {
    async fn save(&self, data: &ScheduleData) -> Result<()> {
        SnapshotStore::save(self, data).await
    }

    async fn publish(&self, data: &ScheduleData) -> Result<()> {
        let mut published = data.clone();
        published.mode = "published".to_string();
        self.save_as(&published, "published").await
    }
}
