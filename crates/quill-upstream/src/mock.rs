//! In-memory document API for tests

use async_trait::async_trait;
use chrono::Utc;
use quill_core::{QuillError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::api::{Comment, CommentUser, DocumentApi, DocumentSnapshot};

/// Mock API with canned documents and comments
///
/// Every call is counted so read-through caching can be asserted.
#[derive(Default)]
pub struct MockDocumentApi {
    files: RwLock<HashMap<String, DocumentSnapshot>>,
    comments: RwLock<HashMap<String, Vec<Comment>>>,
    failing: AtomicBool,
    file_calls: AtomicUsize,
    node_calls: AtomicUsize,
    comment_calls: AtomicUsize,
}

impl MockDocumentApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, file_key: &str, name: &str) -> Self {
        self.insert_file(file_key, name, json!({"id": "0:0", "children": []}));
        self
    }

    pub fn insert_file(&self, file_key: &str, name: &str, document: Value) {
        let snapshot = DocumentSnapshot {
            name: name.to_string(),
            version: Some("1".to_string()),
            last_modified: Some(Utc::now()),
            document,
        };
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_key.to_string(), snapshot);
    }

    /// Add a comment, returning its generated id
    pub fn add_comment(&self, file_key: &str, message: &str, parent_id: Option<&str>) -> String {
        let mut comments = self.comments.write().unwrap_or_else(|e| e.into_inner());
        let thread = comments.entry(file_key.to_string()).or_default();
        let id = format!("c{}", thread.len() + 1);
        thread.push(Comment {
            id: id.clone(),
            message: message.to_string(),
            parent_id: parent_id.map(str::to_string),
            created_at: Utc::now(),
            user: Some(CommentUser {
                handle: "agent".to_string(),
            }),
        });
        id
    }

    /// Make every subsequent call fail with an upstream error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    pub fn node_calls(&self) -> usize {
        self.node_calls.load(Ordering::SeqCst)
    }

    pub fn comment_calls(&self) -> usize {
        self.comment_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QuillError::Upstream("mock upstream failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentApi for MockDocumentApi {
    async fn get_file(&self, file_key: &str) -> Result<DocumentSnapshot> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_key)
            .cloned()
            .ok_or_else(|| QuillError::Upstream(format!("file {} not found", file_key)))
    }

    async fn get_nodes(&self, file_key: &str, ids: &[String]) -> Result<Value> {
        self.node_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        let nodes: serde_json::Map<String, Value> = ids
            .iter()
            .map(|id| (id.clone(), json!({"document": {"id": id}})))
            .collect();
        Ok(json!({ "name": file_key, "nodes": nodes }))
    }

    async fn get_comments(&self, file_key: &str) -> Result<Vec<Comment>> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        Ok(self
            .comments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_key)
            .cloned()
            .unwrap_or_default())
    }
}
