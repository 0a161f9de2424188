//! Applying agent responses to the queue

use quill_cache::{CacheEvent, CacheManager};
use quill_core::{
    CommandResponse, CommandStatus, QueuedCommand, QuillError, ResponseStatus, Result,
};
use quill_queue::{CommandQueue, StatusUpdate};
use tracing::{debug, info};

/// Route a validated response to the matching queue transition
///
/// `success` completes, `error` fails, `pending` acknowledges delivery.
/// A completed command raises `FileModified` so stale reads are dropped.
pub async fn apply_response(
    queue: &CommandQueue,
    cache: &CacheManager,
    id: &str,
    response: CommandResponse,
) -> Result<QueuedCommand> {
    response.validate()?;
    if response.command_id != id {
        return Err(QuillError::Validation(format!(
            "response commandId {} does not match {}",
            response.command_id, id
        )));
    }

    let status = response.status;
    let queued = match status {
        ResponseStatus::Success => queue.mark_completed(id, response).await?,
        ResponseStatus::Error => queue.mark_failed(id, response).await?,
        ResponseStatus::Pending => {
            queue
                .update_status(id, CommandStatus::Posted, StatusUpdate::with_response(response))
                .await?
        }
    };

    match queued.status {
        CommandStatus::Completed => {
            info!("Command {} ({}) completed", id, queued.command.command);
            cache
                .handle_event(&CacheEvent::FileModified {
                    file_key: queued.file_key.clone(),
                })
                .await;
        }
        CommandStatus::Failed => info!("Command {} ({}) failed", id, queued.command.command),
        _ => debug!("Command {} acknowledged", id),
    }

    Ok(queued)
}
