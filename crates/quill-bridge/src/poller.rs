//! Awaitable command completion over a poll-only agent
//!
//! The execution agent is never called. `wait_for_completion` observes the
//! queue on an adaptive schedule, and `poll` reconciles responses that the
//! agent relayed through document comments instead of the bridge.

use quill_cache::CacheManager;
use quill_core::fail_open::fail_open;
use quill_core::{deadline_after, Clock, CommandStatus, QueuedCommand, QuillError, Result};
use quill_queue::CommandQueue;
use quill_upstream::DocumentApi;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::backoff::BackoffPolicy;
use crate::relay::extract_response;
use crate::resolve::apply_response;

/// What one reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub timed_out: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
}

impl PollReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.completed.is_empty() && self.failed.is_empty()
    }
}

pub struct CommandPoller {
    queue: Arc<CommandQueue>,
    cache: Arc<CacheManager>,
    upstream: Option<Arc<dyn DocumentApi>>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
}

impl CommandPoller {
    pub fn new(
        queue: Arc<CommandQueue>,
        cache: Arc<CacheManager>,
        upstream: Option<Arc<dyn DocumentApi>>,
        clock: Arc<dyn Clock>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            queue,
            cache,
            upstream,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Resolve once the command completes
    ///
    /// Fails on `failed`, `timeout`, an unknown id, or when `timeout`
    /// of wall-clock time passes first.
    pub async fn wait_for_completion(
        &self,
        id: &str,
        file_key: &str,
        timeout: Duration,
    ) -> Result<QueuedCommand> {
        let started = self.clock.now();
        let deadline = deadline_after(started, timeout)?;

        let mut backoff = self.policy.start();
        let mut last_seen: Option<CommandStatus> = None;

        loop {
            fail_open("reconcile", || self.poll(file_key)).await;

            let queued = self
                .queue
                .get(id)
                .await
                .ok_or_else(|| QuillError::CommandNotFound(id.to_string()))?;

            match queued.status {
                CommandStatus::Completed => return Ok(queued),
                CommandStatus::Failed => return Err(failure_of(&queued)),
                CommandStatus::Timeout => return Err(QuillError::CommandTimedOut(id.to_string())),
                CommandStatus::Pending | CommandStatus::Posted => {}
            }

            let changed = last_seen.is_some_and(|prev| prev != queued.status);
            last_seen = Some(queued.status);
            let delay = backoff.observe(changed);

            let now = self.clock.now();
            if now >= deadline {
                let waited_ms = (now - started).num_milliseconds().max(0) as u64;
                return Err(QuillError::WaitTimeout {
                    id: id.to_string(),
                    waited_ms,
                });
            }

            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            debug!("Command {} still {}; next poll in {:?}", id, queued.status, delay);
            self.clock.sleep(delay.min(remaining)).await;
        }
    }

    /// One reconciliation pass for a file
    ///
    /// Expires overdue posted commands, then scans replies to each posted
    /// command's comment for a relayed response.
    pub async fn poll(&self, file_key: &str) -> Result<PollReport> {
        let mut report = PollReport {
            timed_out: self.queue.check_timeouts().await,
            ..Default::default()
        };

        let Some(api) = &self.upstream else {
            return Ok(report);
        };

        let awaiting: Vec<QueuedCommand> = self
            .queue
            .active_for_file(file_key)
            .await
            .into_iter()
            .filter(|q| q.status == CommandStatus::Posted && q.comment_id.is_some())
            .collect();
        if awaiting.is_empty() {
            return Ok(report);
        }

        let comments = api.get_comments(file_key).await?;

        for queued in awaiting {
            let Some(comment_id) = queued.comment_id.as_deref() else {
                continue;
            };

            let relayed = comments
                .iter()
                .filter(|c| c.is_reply_to(comment_id))
                .filter_map(|c| extract_response(&c.message))
                .find(|r| r.command_id == queued.id());
            let Some(response) = relayed else {
                continue;
            };

            // The queue may have moved while comments were fetched
            match apply_response(&self.queue, &self.cache, queued.id(), response).await {
                Ok(resolved) => match resolved.status {
                    CommandStatus::Completed => report.completed.push(resolved.id().to_string()),
                    CommandStatus::Failed => report.failed.push(resolved.id().to_string()),
                    _ => {}
                },
                Err(e) => debug!("Relayed response for {} not applied: {}", queued.id(), e),
            }
        }

        Ok(report)
    }
}

fn failure_of(queued: &QueuedCommand) -> QuillError {
    match queued.response.as_ref().and_then(|r| r.error.as_ref()) {
        Some(error) => QuillError::CommandFailed {
            id: queued.id().to_string(),
            code: error.code.clone(),
            message: error.message.clone(),
            details: error.details.clone(),
        },
        None => QuillError::CommandFailed {
            id: queued.id().to_string(),
            code: "UNKNOWN".to_string(),
            message: format!("Command {} failed without an error object", queued.id()),
            details: None,
        },
    }
}
