//! Read-through caching in front of a document API

use async_trait::async_trait;
use quill_cache::{CacheManager, ResourceClass};
use quill_core::config::ResourceTtls;
use quill_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{Comment, DocumentApi, DocumentSnapshot};

/// Wraps any `DocumentApi`, serving repeated reads from the cache
pub struct CachedDocumentApi {
    inner: Arc<dyn DocumentApi>,
    cache: Arc<CacheManager>,
    ttls: ResourceTtls,
}

impl CachedDocumentApi {
    pub fn new(inner: Arc<dyn DocumentApi>, cache: Arc<CacheManager>, ttls: ResourceTtls) -> Self {
        Self { inner, cache, ttls }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.cache.get(key).await?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Dropping unreadable cache entry {}: {}", key, e);
                self.cache.delete(key).await;
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: String, class: ResourceClass, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.cache.set(key, json, Some(class.ttl(&self.ttls))).await,
            Err(e) => warn!("Not caching {}: {}", key, e),
        }
    }
}

#[async_trait]
impl DocumentApi for CachedDocumentApi {
    async fn get_file(&self, file_key: &str) -> Result<DocumentSnapshot> {
        let key = ResourceClass::File.key(file_key, None);
        if let Some(hit) = self.cached(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(hit);
        }
        let snapshot = self.inner.get_file(file_key).await?;
        self.store(key, ResourceClass::File, &snapshot).await;
        Ok(snapshot)
    }

    async fn get_nodes(&self, file_key: &str, ids: &[String]) -> Result<Value> {
        let mut sorted = ids.to_vec();
        sorted.sort();
        sorted.dedup();
        let key = ResourceClass::Nodes.key(file_key, Some(&sorted.join(",")));
        if let Some(hit) = self.cached(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(hit);
        }
        let nodes = self.inner.get_nodes(file_key, ids).await?;
        self.store(key, ResourceClass::Nodes, &nodes).await;
        Ok(nodes)
    }

    async fn get_comments(&self, file_key: &str) -> Result<Vec<Comment>> {
        let key = ResourceClass::Comments.key(file_key, None);
        if let Some(hit) = self.cached(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(hit);
        }
        let comments = self.inner.get_comments(file_key).await?;
        self.store(key, ResourceClass::Comments, &comments).await;
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDocumentApi;
    use quill_cache::CacheEvent;

    fn setup() -> (Arc<MockDocumentApi>, CachedDocumentApi) {
        let mock = Arc::new(MockDocumentApi::new().with_file("abc", "Design"));
        let cached = CachedDocumentApi::new(
            mock.clone(),
            Arc::new(CacheManager::new()),
            ResourceTtls::default(),
        );
        (mock, cached)
    }

    #[tokio::test]
    async fn test_file_read_through() {
        let (mock, cached) = setup();
        assert_eq!(cached.get_file("abc").await.unwrap().name, "Design");
        assert_eq!(cached.get_file("abc").await.unwrap().name, "Design");
        assert_eq!(mock.file_calls(), 1);
    }

    #[tokio::test]
    async fn test_node_key_is_order_insensitive() {
        let (mock, cached) = setup();
        cached
            .get_nodes("abc", &["1:3".to_string(), "1:2".to_string()])
            .await
            .unwrap();
        cached
            .get_nodes("abc", &["1:2".to_string(), "1:3".to_string()])
            .await
            .unwrap();
        assert_eq!(mock.node_calls(), 1);
    }

    #[tokio::test]
    async fn test_file_modified_drops_reads() {
        let (mock, cached) = setup();
        cached.cache().register_default_invalidations().await;

        cached.get_file("abc").await.unwrap();
        cached.get_comments("abc").await.unwrap();
        cached
            .cache()
            .handle_event(&CacheEvent::FileModified {
                file_key: "abc".into(),
            })
            .await;
        cached.get_file("abc").await.unwrap();
        cached.get_comments("abc").await.unwrap();

        assert_eq!(mock.file_calls(), 2);
        assert_eq!(mock.comment_calls(), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (mock, cached) = setup();
        mock.set_failing(true);
        assert!(cached.get_file("abc").await.is_err());
        mock.set_failing(false);
        assert!(cached.get_file("abc").await.is_ok());
        assert_eq!(mock.file_calls(), 2);
    }
}
