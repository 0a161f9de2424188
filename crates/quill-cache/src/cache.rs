//! TTL cache manager

use chrono::{DateTime, Utc};
use quill_core::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::pattern::KeyPattern;

/// TTL applied when `set` is called without one
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Placeholder substituted with the event's file key in registered patterns
const FILE_PLACEHOLDER: &str = "{file}";

#[derive(Debug, Clone)]
struct CacheEntry {
    key: String,
    data: Value,
    written_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now > self.written_at + ttl,
            Err(_) => false,
        }
    }
}

/// Events that make cached upstream reads stale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A modifying command completed against the file
    FileModified {
        #[serde(rename = "fileKey")]
        file_key: String,
    },
    /// A comment was added or resolved on the file
    CommentsChanged {
        #[serde(rename = "fileKey")]
        file_key: String,
    },
}

impl CacheEvent {
    pub fn kind(&self) -> CacheEventKind {
        match self {
            Self::FileModified { .. } => CacheEventKind::FileModified,
            Self::CommentsChanged { .. } => CacheEventKind::CommentsChanged,
        }
    }

    pub fn file_key(&self) -> &str {
        match self {
            Self::FileModified { file_key } | Self::CommentsChanged { file_key } => file_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    FileModified,
    CommentsChanged,
}

/// Hit/miss counters and current size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// In-memory TTL map with pattern and event invalidation
pub struct CacheManager {
    entries: RwLock<HashMap<String, CacheEntry>>,
    invalidations: RwLock<HashMap<CacheEventKind, Vec<String>>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            invalidations: RwLock::new(HashMap::new()),
            clock,
            default_ttl: DEFAULT_TTL,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Store a value, replacing any previous entry for the key
    pub async fn set(&self, key: impl Into<String>, data: Value, ttl: Option<Duration>) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            data,
            written_at: self.clock.now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Read a value; an expired entry is evicted and reported as a miss
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            debug!("Cache entry {} expired", key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop every entry whose key matches `pattern`
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let pattern = KeyPattern::new(pattern);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Invalidated {} cache entr(ies) matching {}", removed, pattern);
        }
        removed
    }

    /// On `kind`, invalidate keys matching `pattern`
    ///
    /// `{file}` in the pattern is replaced with the event's file key.
    pub async fn register_event_invalidation(
        &self,
        kind: CacheEventKind,
        pattern: impl Into<String>,
    ) {
        let pattern = pattern.into();
        let mut invalidations = self.invalidations.write().await;
        let patterns = invalidations.entry(kind).or_default();
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }

    /// Register the standard patterns for file and comment changes
    pub async fn register_default_invalidations(&self) {
        self.register_event_invalidation(CacheEventKind::FileModified, "file:{file}")
            .await;
        self.register_event_invalidation(CacheEventKind::FileModified, "file:{file}:*")
            .await;
        self.register_event_invalidation(CacheEventKind::CommentsChanged, "file:{file}:comments")
            .await;
    }

    /// Apply every pattern registered for the event's kind
    pub async fn handle_event(&self, event: &CacheEvent) -> usize {
        let patterns = {
            let invalidations = self.invalidations.read().await;
            invalidations.get(&event.kind()).cloned().unwrap_or_default()
        };

        let mut removed = 0;
        for pattern in patterns {
            let concrete = pattern.replace(FILE_PLACEHOLDER, event.file_key());
            removed += self.invalidate(&concrete).await;
        }

        debug!("{:?} invalidated {} cache entr(ies)", event, removed);
        removed
    }

    /// Evict every expired entry in one pass
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            let expired = entry.is_expired(now);
            if expired {
                trace!("Evicting {}", entry.key);
            }
            !expired
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} expired cache entr(ies)", removed);
        }
        removed
    }

    /// Run `sweep` on a fixed interval until the handle is aborted
    ///
    /// A zero interval is raised to 1ms.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(Duration::from_millis(1));
        let cache = Arc::clone(self);
        info!("Cache sweeper running every {:?}", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: self.len().await,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}
