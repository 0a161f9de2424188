//! Fail-open utilities for best-effort work
//!
//! Backups, reconciliation passes and cache sweeps must never take the
//! submission path down with them. Wrap them here so failures are logged
//! and swallowed.
//!
//! DO NOT use fail-open for:
//! - Queue transitions (state)
//! - Response validation (boundary correctness)

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use quill_core::fail_open::fail_open;
/// use quill_core::Result;
///
/// async fn snapshot_document() -> Result<String> {
///     Ok("backup-1".to_string())
/// }
///
/// async fn example() {
///     let backup_id = fail_open("backup", || snapshot_document()).await;
///     // backup_id is None if the snapshot failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
