//! Pre-mutation document backups
//!
//! Modifying commands trigger a full snapshot before they are queued.
//! This is a best-effort safety net: failures are logged, never raised to
//! the submission path.

use chrono::{DateTime, Utc};
use quill_core::fail_open::fail_open;
use quill_core::{Clock, Command, QuillError, Result, SystemClock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{DocumentApi, DocumentSnapshot};
use crate::store::BackupStore;

/// Record of one snapshot. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: String,
    pub file_key: String,
    pub file_name: String,
    pub snapshot_location: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_version: Option<String>,
    /// Hex SHA-256 of the stored snapshot bytes
    pub checksum: String,
}

pub struct BackupService {
    api: Arc<dyn DocumentApi>,
    store: Arc<dyn BackupStore>,
    clock: Arc<dyn Clock>,
    enabled: bool,
}

impl BackupService {
    pub fn new(api: Arc<dyn DocumentApi>, store: Arc<dyn BackupStore>) -> Self {
        Self {
            api,
            store,
            clock: Arc::new(SystemClock),
            enabled: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether submitting `command` should snapshot the document first
    pub fn needs_backup(&self, command: &Command) -> bool {
        self.enabled && command.command.is_modifying()
    }

    /// Snapshot the document now
    pub async fn create_backup(
        &self,
        file_key: &str,
        command_id: Option<&str>,
    ) -> Result<BackupMetadata> {
        let snapshot = self.api.get_file(file_key).await?;
        let bytes = serde_json::to_vec(&snapshot)?;
        let checksum = hex::encode(Sha256::digest(&bytes));

        let id = Uuid::new_v4().to_string();
        let created_at = self.clock.now();
        let name = format!("{}-{}", created_at.format("%Y%m%dT%H%M%S%3fZ"), id);
        let snapshot_location = self.store.put_snapshot(file_key, &name, &bytes).await?;

        let metadata = BackupMetadata {
            id,
            file_key: file_key.to_string(),
            file_name: snapshot.name,
            snapshot_location,
            created_at,
            command_id: command_id.map(str::to_string),
            file_version: snapshot.version,
            checksum,
        };
        self.store.append(&metadata).await?;

        info!(
            "Backed up {} ({}) as {}",
            metadata.file_key, metadata.file_name, metadata.id
        );
        Ok(metadata)
    }

    /// Snapshot before a modifying command; `None` if skipped or failed
    pub async fn backup_if_needed(&self, command: &Command, file_key: &str) -> Option<BackupMetadata> {
        if !self.needs_backup(command) {
            debug!("No backup needed for {} ({})", command.id, command.command);
            return None;
        }
        fail_open("backup", || self.create_backup(file_key, Some(&command.id))).await
    }

    pub async fn list(&self, file_key: &str) -> Result<Vec<BackupMetadata>> {
        self.store.list(file_key).await
    }

    /// Look up one backup of a file by id
    pub async fn get(&self, file_key: &str, backup_id: &str) -> Result<Option<BackupMetadata>> {
        Ok(self
            .store
            .list(file_key)
            .await?
            .into_iter()
            .find(|m| m.id == backup_id))
    }

    /// Read a snapshot back, verifying its checksum
    pub async fn load_snapshot(&self, metadata: &BackupMetadata) -> Result<DocumentSnapshot> {
        let bytes = self.store.read_snapshot(&metadata.snapshot_location).await?;
        let checksum = hex::encode(Sha256::digest(&bytes));
        if checksum != metadata.checksum {
            return Err(QuillError::Backup(format!(
                "Checksum mismatch for backup {}",
                metadata.id
            )));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
