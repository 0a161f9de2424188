//! Append-only backup persistence
//!
//! Snapshots are written once and never overwritten. Metadata goes to an
//! append-only JSON lines index next to them.

use async_trait::async_trait;
use quill_core::{QuillError, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::backup::BackupMetadata;

const INDEX_FILE: &str = "index.jsonl";

/// Opaque keyed log for document snapshots
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Persist snapshot bytes, returning the location recorded in metadata
    async fn put_snapshot(&self, file_key: &str, name: &str, bytes: &[u8]) -> Result<String>;

    /// Read snapshot bytes back
    async fn read_snapshot(&self, location: &str) -> Result<Vec<u8>>;

    /// Append a metadata record
    async fn append(&self, metadata: &BackupMetadata) -> Result<()>;

    /// Metadata for one file, oldest first
    async fn list(&self, file_key: &str) -> Result<Vec<BackupMetadata>>;
}

/// Backups on the local filesystem under `root/{file_key}/`
pub struct FileBackupStore {
    root: PathBuf,
}

impl FileBackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }
}

/// File keys become directory names; keep them to one safe path component
fn safe_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn put_snapshot(&self, file_key: &str, name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(safe_component(file_key));
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.json", safe_component(name)));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                QuillError::Backup(format!("Cannot create {}: {}", path.display(), e))
            })?;
        file.write_all(bytes).await?;
        file.flush().await?;

        debug!("Wrote snapshot {}", path.display());
        Ok(path.to_string_lossy().into_owned())
    }

    async fn read_snapshot(&self, location: &str) -> Result<Vec<u8>> {
        let path = Path::new(location);
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(QuillError::Backup(format!(
                "{} is outside the backup directory",
                location
            )));
        }
        Ok(tokio::fs::read(path).await?)
    }

    async fn append(&self, metadata: &BackupMetadata) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let mut line = serde_json::to_string(metadata)?;
        line.push('\n');

        let mut index = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path())
            .await?;
        index.write_all(line.as_bytes()).await?;
        index.flush().await?;
        Ok(())
    }

    async fn list(&self, file_key: &str) -> Result<Vec<BackupMetadata>> {
        let content = match tokio::fs::read_to_string(self.index_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BackupMetadata>(line) {
                Ok(meta) if meta.file_key == file_key => records.push(meta),
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed backup index line {}: {}", n + 1, e),
            }
        }
        Ok(records)
    }
}

/// Volatile store for tests and backup-less runs
#[derive(Default)]
pub struct MemoryBackupStore {
    snapshots: RwLock<HashMap<String, Vec<u8>>>,
    records: RwLock<Vec<BackupMetadata>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn put_snapshot(&self, file_key: &str, name: &str, bytes: &[u8]) -> Result<String> {
        let location = format!("memory://{}/{}", file_key, name);
        let mut snapshots = self.snapshots.write().await;
        if snapshots.contains_key(&location) {
            return Err(QuillError::Backup(format!("{} already exists", location)));
        }
        snapshots.insert(location.clone(), bytes.to_vec());
        Ok(location)
    }

    async fn read_snapshot(&self, location: &str) -> Result<Vec<u8>> {
        self.snapshots
            .read()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| QuillError::Backup(format!("No snapshot at {}", location)))
    }

    async fn append(&self, metadata: &BackupMetadata) -> Result<()> {
        self.records.write().await.push(metadata.clone());
        Ok(())
    }

    async fn list(&self, file_key: &str) -> Result<Vec<BackupMetadata>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|m| m.file_key == file_key)
            .cloned()
            .collect())
    }
}
