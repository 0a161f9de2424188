//! Read-only document API contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full document as returned by the upstream file endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub document: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentUser {
    pub handle: String,
}

/// A comment on the document; the agent relays responses as replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<CommentUser>,
}

impl Comment {
    /// Whether this comment is a reply in the thread rooted at `comment_id`
    pub fn is_reply_to(&self, comment_id: &str) -> bool {
        self.parent_id
            .as_deref()
            .is_some_and(|parent| !parent.is_empty() && parent == comment_id)
    }
}

/// Read-only view of the upstream document service
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Full document snapshot
    async fn get_file(&self, file_key: &str) -> Result<DocumentSnapshot>;

    /// Subtrees for specific node ids
    async fn get_nodes(&self, file_key: &str, ids: &[String]) -> Result<Value>;

    /// All comments on the document, oldest first
    async fn get_comments(&self, file_key: &str) -> Result<Vec<Comment>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comment_reply_detection() {
        let reply: Comment = serde_json::from_value(json!({
            "id": "2",
            "message": "done",
            "parent_id": "1",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(reply.is_reply_to("1"));
        assert!(!reply.is_reply_to("3"));

        let root: Comment = serde_json::from_value(json!({
            "id": "1",
            "message": "cmd",
            "parent_id": "",
            "created_at": "2024-01-01T00:00:00Z",
            "user": {"handle": "quill"}
        }))
        .unwrap();
        assert!(!root.is_reply_to(""));
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snapshot: DocumentSnapshot = serde_json::from_value(json!({
            "name": "Design",
            "version": "42",
            "lastModified": "2024-01-01T00:00:00Z",
            "document": {"id": "0:0", "children": []},
            "schemaVersion": 0
        }))
        .unwrap();
        assert_eq!(snapshot.version.as_deref(), Some("42"));
        assert_eq!(snapshot.document["id"], "0:0");
    }
}
