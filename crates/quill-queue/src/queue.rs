//! In-memory command registry with priority draw order
//!
//! Every mutation happens under one write lock, so a timeout sweep or a
//! cleanup pass is atomic with respect to request handlers.

use chrono::{DateTime, Utc};
use quill_core::{
    deadline_after, Clock, Command, CommandResponse, CommandStatus, Priority, QueuedCommand, QuillError, Result,
    SystemClock, DEFAULT_COMMAND_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::state_machine::{transition, QueueEvent, Transition};

/// Side-channel fields merged into a command on a status update
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub comment_id: Option<String>,
    pub response: Option<CommandResponse>,
}

impl StatusUpdate {
    pub fn with_comment(comment_id: impl Into<String>) -> Self {
        Self {
            comment_id: Some(comment_id.into()),
            response: None,
        }
    }

    pub fn with_response(response: CommandResponse) -> Self {
        Self {
            comment_id: None,
            response: Some(response),
        }
    }
}

/// Counts by status and by priority tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
}

impl QueueStats {
    pub fn status(&self, status: CommandStatus) -> usize {
        self.by_status
            .get(&status.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn priority(&self, priority: Priority) -> usize {
        self.by_priority
            .get(&priority.to_string())
            .copied()
            .unwrap_or(0)
    }
}

struct Entry {
    /// Submission sequence, breaks `created_at` ties
    seq: u64,
    queued: QueuedCommand,
}

struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl Inner {
    fn in_submission_order<'a>(
        &'a self,
        filter: impl Fn(&QueuedCommand) -> bool + 'a,
    ) -> Vec<&'a Entry> {
        let mut entries: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| filter(&e.queued))
            .collect();
        entries.sort_by(|a, b| {
            a.queued
                .created_at
                .cmp(&b.queued.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        entries
    }
}

/// Registry and state machine for submitted commands
pub struct CommandQueue {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    default_timeout: Duration,
}

impl CommandQueue {
    /// Create a queue on the system clock with the default 30s deadline
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
            }),
            clock,
            default_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Enqueue a command as `pending`
    ///
    /// The deadline is fixed here (`now + timeout`) and never moved.
    pub async fn add(
        &self,
        command: Command,
        file_key: impl Into<String>,
        timeout: Option<Duration>,
        priority: Option<Priority>,
    ) -> Result<String> {
        let file_key = file_key.into();
        let now = self.now();
        let timeout = timeout.unwrap_or(self.default_timeout);
        let timeout_at = deadline_after(now, timeout)?;
        let priority = priority.unwrap_or_default();

        let mut inner = self.inner.write().await;

        if inner.entries.contains_key(&command.id) {
            return Err(QuillError::Validation(format!(
                "Command id already queued: {}",
                command.id
            )));
        }

        if let Some(key) = &command.idempotency_key {
            let duplicate = inner.entries.values().any(|e| {
                e.queued.command.idempotency_key.as_deref() == Some(key.as_str())
                    && e.queued.status.is_active()
            });
            if duplicate {
                // Accepted, not enforced
                debug!("Idempotency key {} already active; queuing anyway", key);
            }
        }

        let id = command.id.clone();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        debug!(
            "Queued {} ({}) for file {} at priority {}",
            id, command.command, file_key, priority
        );

        inner.entries.insert(
            id.clone(),
            Entry {
                seq,
                queued: QueuedCommand {
                    command,
                    file_key,
                    status: CommandStatus::Pending,
                    priority,
                    created_at: now,
                    updated_at: now,
                    timeout_at,
                    comment_id: None,
                    backup_id: None,
                    response: None,
                },
            },
        );

        Ok(id)
    }

    /// Look up a command by id
    pub async fn get(&self, id: &str) -> Option<QueuedCommand> {
        let inner = self.inner.read().await;
        inner.entries.get(id).map(|e| e.queued.clone())
    }

    /// Current status of a command, if known
    pub async fn status(&self, id: &str) -> Option<CommandStatus> {
        let inner = self.inner.read().await;
        inner.entries.get(id).map(|e| e.queued.status)
    }

    /// Next pending command: lowest priority rank first, FIFO within a tier
    pub async fn get_next(&self, allowed: Option<&[Priority]>) -> Option<QueuedCommand> {
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .filter(|e| e.queued.status == CommandStatus::Pending)
            .filter(|e| allowed.map_or(true, |set| set.contains(&e.queued.priority)))
            .min_by(|a, b| {
                a.queued
                    .priority
                    .cmp(&b.queued.priority)
                    .then(a.queued.created_at.cmp(&b.queued.created_at))
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|e| e.queued.clone())
    }

    /// Pending and posted commands for a file, in submission order
    pub async fn active_for_file(&self, file_key: &str) -> Vec<QueuedCommand> {
        let inner = self.inner.read().await;
        inner
            .in_submission_order(|q| q.file_key == file_key && q.status.is_active())
            .into_iter()
            .map(|e| e.queued.clone())
            .collect()
    }

    /// Every command for a file, in submission order
    pub async fn for_file(&self, file_key: &str) -> Vec<QueuedCommand> {
        let inner = self.inner.read().await;
        inner
            .in_submission_order(|q| q.file_key == file_key)
            .into_iter()
            .map(|e| e.queued.clone())
            .collect()
    }

    /// Every command, in submission order
    pub async fn list(&self) -> Vec<QueuedCommand> {
        let inner = self.inner.read().await;
        inner
            .in_submission_order(|_| true)
            .into_iter()
            .map(|e| e.queued.clone())
            .collect()
    }

    /// Hand the active commands of a file to the agent
    ///
    /// Pending commands are marked `posted` in the same pass, so their
    /// deadline starts to apply from this delivery.
    pub async fn deliver(&self, file_key: &str) -> Vec<QueuedCommand> {
        let now = self.now();
        let mut inner = self.inner.write().await;

        let ids: Vec<String> = inner
            .in_submission_order(|q| q.file_key == file_key && q.status.is_active())
            .into_iter()
            .map(|e| e.queued.command.id.clone())
            .collect();

        let mut delivered = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = inner.entries.get_mut(&id) {
                if entry.queued.status != CommandStatus::Pending {
                    delivered.push(entry.queued.clone());
                    continue;
                }
                if let Transition::To(next) = transition(entry.queued.status, QueueEvent::Delivered)
                {
                    entry.queued.status = next;
                    entry.queued.updated_at = now;
                    debug!("Delivered {} to agent", id);
                }
                delivered.push(entry.queued.clone());
            }
        }
        delivered
    }

    /// Move a command to `status`, merging side-channel fields
    ///
    /// Unknown ids yield `CommandNotFound`; transitions the state machine
    /// rejects yield `InvalidTransition` and leave the command untouched.
    pub async fn update_status(
        &self,
        id: &str,
        status: CommandStatus,
        update: StatusUpdate,
    ) -> Result<QueuedCommand> {
        let now = self.now();
        let mut inner = self.inner.write().await;

        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| QuillError::CommandNotFound(id.to_string()))?;

        let current = entry.queued.status;
        let next = match transition(current, QueueEvent::for_target(status)) {
            Transition::To(next) => next,
            Transition::Rejected { reason } => {
                warn!("Rejected transition for {}: {}", id, reason);
                return Err(QuillError::InvalidTransition {
                    id: id.to_string(),
                    from: current,
                    to: status,
                });
            }
        };

        let queued = &mut entry.queued;
        queued.status = next;
        queued.updated_at = now;
        if let Some(comment_id) = update.comment_id {
            queued.comment_id = Some(comment_id);
        }
        if let Some(response) = update.response {
            queued.response = Some(response);
        }

        if current != next {
            debug!("Command {}: {} -> {}", id, current, next);
        }

        Ok(queued.clone())
    }

    /// Record delivery, optionally linking the relay comment
    pub async fn mark_posted(&self, id: &str, comment_id: Option<String>) -> Result<QueuedCommand> {
        let update = StatusUpdate {
            comment_id,
            response: None,
        };
        self.update_status(id, CommandStatus::Posted, update).await
    }

    /// Resolve successfully with the agent's response
    pub async fn mark_completed(&self, id: &str, response: CommandResponse) -> Result<QueuedCommand> {
        self.update_status(id, CommandStatus::Completed, StatusUpdate::with_response(response))
            .await
    }

    /// Resolve with the agent's error response
    pub async fn mark_failed(&self, id: &str, response: CommandResponse) -> Result<QueuedCommand> {
        self.update_status(id, CommandStatus::Failed, StatusUpdate::with_response(response))
            .await
    }

    /// Link the pre-mutation backup taken for a command
    pub async fn attach_backup(&self, id: &str, backup_id: impl Into<String>) -> Result<()> {
        let now = self.now();
        let mut inner = self.inner.write().await;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| QuillError::CommandNotFound(id.to_string()))?;
        entry.queued.backup_id = Some(backup_id.into());
        entry.queued.updated_at = now;
        Ok(())
    }

    /// Flip posted commands past their deadline to `timeout`
    ///
    /// Pending commands are never expired here.
    pub async fn check_timeouts(&self) -> Vec<String> {
        let now = self.now();
        let mut inner = self.inner.write().await;
        let mut expired = Vec::new();

        for (id, entry) in inner.entries.iter_mut() {
            let queued = &mut entry.queued;
            if queued.status != CommandStatus::Posted || now <= queued.timeout_at {
                continue;
            }
            if let Transition::To(next) = transition(queued.status, QueueEvent::DeadlinePassed) {
                queued.status = next;
                queued.updated_at = now;
                queued.response = Some(CommandResponse::timed_out(id.clone(), queued.timeout_at));
                expired.push(id.clone());
            }
        }

        if !expired.is_empty() {
            info!("Timed out {} posted command(s)", expired.len());
        }
        expired
    }

    /// Counts by status and priority tier
    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.read().await;
        let mut stats = QueueStats {
            total: inner.entries.len(),
            ..Default::default()
        };
        for status in CommandStatus::ALL {
            stats.by_status.insert(status.to_string(), 0);
        }
        for priority in Priority::ALL {
            stats.by_priority.insert(priority.to_string(), 0);
        }
        for entry in inner.entries.values() {
            *stats
                .by_status
                .entry(entry.queued.status.to_string())
                .or_default() += 1;
            *stats
                .by_priority
                .entry(entry.queued.priority.to_string())
                .or_default() += 1;
        }
        stats
    }

    /// Delete terminal commands not updated within `max_age`
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| self.now().checked_sub_signed(age))
        {
            Some(cutoff) => cutoff,
            None => return 0,
        };
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| !(e.queued.status.is_terminal() && e.queued.updated_at < cutoff));
        let removed = before - inner.entries.len();
        if removed > 0 {
            info!("Cleaned up {} terminal command(s)", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
