//! Command submission pipeline
//!
//! preview -> conflict check -> backup -> enqueue -> optional wait. Only
//! enqueue can fail the submission; the other steps are advisory.

use quill_core::{
    deadline_after, Command, CommandKind, CommandResponse, CommandStatus, Priority, QuillError,
    Result,
};
use quill_queue::{Conflict, ConflictTask, PreviewResult};
use quill_upstream::BackupMetadata;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::state::BridgeState;

/// One command as a caller describes it, before an id is assigned
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub command: CommandKind,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CommandSpec {
    pub fn into_command(self) -> Command {
        let mut command = Command::new(self.command, self.params);
        command.parent = self.parent;
        command.idempotency_key = self.idempotency_key;
        command
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(flatten)]
    pub spec: CommandSpec,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Preview only; nothing is queued
    #[serde(default)]
    pub dry_run: bool,
    /// Hold the request until the command resolves
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub command_id: String,
    pub file_key: String,
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CommandStatus>,
    pub preview: PreviewResult,
    pub conflicts: Vec<Conflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CommandResponse>,
}

impl BridgeState {
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        let file_key = self.resolve_file_key(request.file_key.as_deref()).await?;
        let command = request.spec.into_command();
        command.validate()?;

        let timeout = request.timeout_ms.map(Duration::from_millis);
        let wait = request.wait.then(|| {
            Duration::from_millis(
                request
                    .wait_timeout_ms
                    .unwrap_or(self.config.poller.default_wait_timeout_ms),
            )
        });
        // Reject unrepresentable deadlines before anything is backed up or queued
        let now = self.clock().now();
        for limit in timeout.iter().chain(wait.iter()) {
            deadline_after(now, *limit)?;
        }

        let preview = self.preview.preview(std::slice::from_ref(&command));

        if request.dry_run {
            debug!("Dry run for {} on {}", command.command, file_key);
            return Ok(SubmitOutcome {
                command_id: command.id,
                file_key,
                queued: false,
                status: None,
                preview,
                conflicts: Vec::new(),
                backup: None,
                response: None,
            });
        }

        let active: Vec<ConflictTask> = self
            .queue
            .active_for_file(&file_key)
            .await
            .iter()
            .map(ConflictTask::from)
            .collect();
        let task = ConflictTask {
            id: command.id.clone(),
            status: CommandStatus::Pending,
            target: command.target_node().map(str::to_string),
            commands: vec![command.clone()],
        };
        let conflicts = self.conflicts.check_conflicts(&task, &active);
        for conflict in &conflicts {
            warn!("{}", conflict.description);
        }

        let backup = match &self.backups {
            Some(backups) => backups.backup_if_needed(&command, &file_key).await,
            None => None,
        };

        let id = self
            .queue
            .add(command, file_key.clone(), timeout, request.priority)
            .await?;
        if let Some(meta) = &backup {
            self.queue.attach_backup(&id, meta.id.clone()).await?;
        }
        info!("Submitted {} for {}", id, file_key);

        let (status, response) = if let Some(wait) = wait {
            let resolved = self.poller.wait_for_completion(&id, &file_key, wait).await?;
            (resolved.status, resolved.response)
        } else {
            let status = self
                .queue
                .status(&id)
                .await
                .ok_or_else(|| QuillError::CommandNotFound(id.clone()))?;
            (status, None)
        };

        Ok(SubmitOutcome {
            command_id: id,
            file_key,
            queued: true,
            status: Some(status),
            preview,
            conflicts,
            backup,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::QuillConfig;
    use quill_upstream::{MemoryBackupStore, MockDocumentApi};
    use serde_json::json;
    use std::sync::Arc;

    fn request(raw: Value) -> SubmitRequest {
        serde_json::from_value(raw).unwrap()
    }

    async fn state_with_upstream() -> (crate::state::SharedState, Arc<MockDocumentApi>) {
        let mock = Arc::new(MockDocumentApi::new().with_file("abc", "Design"));
        let state = BridgeState::builder(QuillConfig::default())
            .upstream(mock.clone())
            .backup_store(Arc::new(MemoryBackupStore::new()))
            .build()
            .await;
        (state, mock)
    }

    #[tokio::test]
    async fn test_submit_queues_pending() {
        let (state, _) = state_with_upstream().await;
        let outcome = state
            .submit(request(json!({
                "fileKey": "abc",
                "command": "set_fill",
                "params": {"nodeId": "1:2", "color": "#fff"},
                "priority": "interactive"
            })))
            .await
            .unwrap();

        assert!(outcome.queued);
        assert_eq!(outcome.status, Some(CommandStatus::Pending));
        assert!(outcome.backup.is_none());
        let queued = state.queue.get(&outcome.command_id).await.unwrap();
        assert_eq!(queued.priority, Priority::Interactive);
    }

    #[tokio::test]
    async fn test_dry_run_queues_nothing() {
        let (state, _) = state_with_upstream().await;
        let outcome = state
            .submit(request(json!({
                "fileKey": "abc",
                "command": "delete",
                "params": {"nodeId": "1:2"},
                "dryRun": true
            })))
            .await
            .unwrap();

        assert!(!outcome.queued);
        assert!(!outcome.preview.warnings.is_empty());
        assert!(state.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_modifying_command_backed_up_and_linked() {
        let (state, _) = state_with_upstream().await;
        let outcome = state
            .submit(request(json!({
                "fileKey": "abc",
                "command": "delete",
                "params": {"nodeId": "1:2"}
            })))
            .await
            .unwrap();

        let backup = outcome.backup.unwrap();
        let queued = state.queue.get(&outcome.command_id).await.unwrap();
        assert_eq!(queued.backup_id, Some(backup.id));
    }

    #[tokio::test]
    async fn test_backup_failure_does_not_block() {
        let (state, mock) = state_with_upstream().await;
        mock.set_failing(true);
        let outcome = state
            .submit(request(json!({
                "fileKey": "abc",
                "command": "move",
                "params": {"nodeId": "1:2", "x": 10}
            })))
            .await
            .unwrap();
        assert!(outcome.queued);
        assert!(outcome.backup.is_none());
    }

    #[tokio::test]
    async fn test_conflicts_reported_not_blocking() {
        let (state, _) = state_with_upstream().await;
        let body = json!({
            "fileKey": "abc",
            "command": "set_fill",
            "params": {"nodeId": "1:2"}
        });
        let first = state.submit(request(body.clone())).await.unwrap();
        let second = state.submit(request(body)).await.unwrap();

        assert!(second.queued);
        assert_eq!(second.conflicts.len(), 1);
        assert_eq!(second.conflicts[0].conflicting_task_id, first.command_id);
    }

    #[tokio::test]
    async fn test_missing_file_key_without_current_file() {
        let (state, _) = state_with_upstream().await;
        let err = state
            .submit(request(json!({"command": "create_frame"})))
            .await
            .unwrap_err();
        assert!(matches!(err, QuillError::Validation(_)));

        state.set_current_file("abc", None).await.unwrap();
        let outcome = state
            .submit(request(json!({"command": "create_frame"})))
            .await
            .unwrap();
        assert_eq!(outcome.file_key, "abc");
    }

    #[tokio::test]
    async fn test_invalid_command_never_enters_queue() {
        let (state, _) = state_with_upstream().await;
        let err = state
            .submit(request(json!({"fileKey": "abc", "command": "delete"})))
            .await
            .unwrap_err();
        assert!(matches!(err, QuillError::Validation(_)));
        assert!(state.queue.is_empty().await);
    }
}
