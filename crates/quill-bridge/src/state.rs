//! Shared bridge state
//!
//! Every service is constructed once here and handed to the HTTP layer by
//! handle; there are no process-wide singletons.

use chrono::{DateTime, Utc};
use quill_cache::CacheManager;
use quill_core::{Clock, QuillConfig, QuillError, Result, SystemClock};
use quill_queue::{CommandQueue, ConflictDetector, PreviewService};
use quill_upstream::{
    BackupService, BackupStore, CachedDocumentApi, DocumentApi, FileBackupStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::backoff::BackoffPolicy;
use crate::poller::CommandPoller;

/// The document the agent last announced as open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentFile {
    pub file_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct BridgeState {
    pub config: QuillConfig,
    pub queue: Arc<CommandQueue>,
    pub cache: Arc<CacheManager>,
    pub conflicts: ConflictDetector,
    pub preview: PreviewService,
    pub poller: Arc<CommandPoller>,
    /// Read-through document access, present when an upstream is configured
    pub documents: Option<CachedDocumentApi>,
    pub backups: Option<BackupService>,
    clock: Arc<dyn Clock>,
    current_file: RwLock<Option<CurrentFile>>,
    started_at: DateTime<Utc>,
}

pub type SharedState = Arc<BridgeState>;

impl BridgeState {
    pub fn builder(config: QuillConfig) -> BridgeStateBuilder {
        BridgeStateBuilder {
            config,
            clock: None,
            upstream: None,
            backup_store: None,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_secs(&self) -> u64 {
        (self.clock.now() - self.started_at).num_seconds().max(0) as u64
    }

    pub async fn current_file(&self) -> Option<CurrentFile> {
        self.current_file.read().await.clone()
    }

    pub async fn set_current_file(
        &self,
        file_key: &str,
        file_name: Option<String>,
    ) -> Result<CurrentFile> {
        let file_key = file_key.trim();
        if file_key.is_empty() {
            return Err(QuillError::Validation("fileKey is empty".to_string()));
        }
        let current = CurrentFile {
            file_key: file_key.to_string(),
            file_name,
            updated_at: self.clock.now(),
        };
        let mut slot = self.current_file.write().await;
        if slot.as_ref().map(|c| c.file_key.as_str()) != Some(file_key) {
            info!("Current file is now {}", file_key);
        }
        *slot = Some(current.clone());
        Ok(current)
    }

    /// An explicit file key, else the announced current file
    pub async fn resolve_file_key(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }
        self.current_file()
            .await
            .map(|c| c.file_key)
            .ok_or_else(|| {
                QuillError::Validation(
                    "no fileKey given and no current file has been announced".to_string(),
                )
            })
    }
}

pub struct BridgeStateBuilder {
    config: QuillConfig,
    clock: Option<Arc<dyn Clock>>,
    upstream: Option<Arc<dyn DocumentApi>>,
    backup_store: Option<Arc<dyn BackupStore>>,
}

impl BridgeStateBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Upstream document API used for backups, reads and comment relay
    pub fn upstream(mut self, api: Arc<dyn DocumentApi>) -> Self {
        self.upstream = Some(api);
        self
    }

    /// Override the backup store (defaults to files under `backup.dir`)
    pub fn backup_store(mut self, store: Arc<dyn BackupStore>) -> Self {
        self.backup_store = Some(store);
        self
    }

    pub async fn build(self) -> SharedState {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let queue = Arc::new(
            CommandQueue::with_clock(clock.clone())
                .with_default_timeout(config.queue.default_timeout()),
        );
        let cache = Arc::new(
            CacheManager::with_clock(clock.clone()).with_default_ttl(config.cache.default_ttl()),
        );
        cache.register_default_invalidations().await;

        let documents = self.upstream.as_ref().map(|api| {
            CachedDocumentApi::new(api.clone(), cache.clone(), config.cache.ttl.clone())
        });

        let backups = self.upstream.as_ref().map(|api| {
            let store = self
                .backup_store
                .clone()
                .unwrap_or_else(|| Arc::new(FileBackupStore::new(config.backup.dir.clone())));
            BackupService::new(api.clone(), store)
                .with_clock(clock.clone())
                .with_enabled(config.backup.enabled)
        });

        let poller = Arc::new(CommandPoller::new(
            queue.clone(),
            cache.clone(),
            self.upstream.clone(),
            clock.clone(),
            BackoffPolicy::from_config(&config.poller),
        ));

        if self.upstream.is_none() {
            info!("No upstream API configured; backups and comment relay disabled");
        }

        Arc::new(BridgeState {
            queue,
            cache,
            conflicts: ConflictDetector::new(),
            preview: PreviewService::new(),
            poller,
            documents,
            backups,
            started_at: clock.now(),
            clock,
            current_file: RwLock::new(None),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_file_key() {
        let state = BridgeState::builder(QuillConfig::default()).build().await;
        assert!(state.resolve_file_key(None).await.is_err());
        assert_eq!(state.resolve_file_key(Some("abc")).await.unwrap(), "abc");

        state.set_current_file("xyz", Some("Design".into())).await.unwrap();
        assert_eq!(state.resolve_file_key(None).await.unwrap(), "xyz");
        assert_eq!(state.resolve_file_key(Some("  ")).await.unwrap(), "xyz");
    }

    #[tokio::test]
    async fn test_empty_current_file_rejected() {
        let state = BridgeState::builder(QuillConfig::default()).build().await;
        assert!(matches!(
            state.set_current_file(" ", None).await,
            Err(QuillError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_no_upstream_means_no_backups() {
        let state = BridgeState::builder(QuillConfig::default()).build().await;
        assert!(state.backups.is_none());
        assert!(state.documents.is_none());
    }
}
