//! Background upkeep while the bridge is serving

use quill_core::fail_open::fail_open;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::state::SharedState;

/// Periodic timeout checks, queue cleanup and cache sweeping
pub struct MaintenanceTasks {
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceTasks {
    pub fn spawn(state: &SharedState) -> Self {
        let mut handles = Vec::new();

        let timeouts = state.clone();
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(timeouts.config.queue.timeout_check_interval());
            loop {
                tick.tick().await;
                reconcile(&timeouts).await;
            }
        }));

        let cleanup = state.clone();
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(cleanup.config.queue.cleanup_interval());
            tick.tick().await;
            loop {
                tick.tick().await;
                cleanup
                    .queue
                    .cleanup(cleanup.config.queue.cleanup_max_age())
                    .await;
            }
        }));

        handles.push(state.cache.spawn_sweeper(state.config.cache.sweep_interval()));

        Self { handles }
    }

    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// One timeout/relay pass; relay needs a current file to scan
pub async fn reconcile(state: &SharedState) {
    match state.current_file().await {
        Some(current) => {
            if let Some(report) =
                fail_open("reconcile", || state.poller.poll(&current.file_key)).await
            {
                if !report.is_empty() {
                    debug!("Reconciled {}: {:?}", current.file_key, report);
                }
            }
        }
        None => {
            let expired = state.queue.check_timeouts().await;
            if !expired.is_empty() {
                debug!("Expired {} commands", expired.len());
            }
        }
    }
}
