//! # quill-queue
//!
//! Command registry and the advisory services consumed by submission.
//!
//! This crate provides:
//! - A pure status transition function
//! - `CommandQueue` with priority draw order and delivery-gated timeouts
//! - `ConflictDetector` for overlapping in-flight commands
//! - `PreviewService` for dry-run classification

mod conflict;
mod preview;
mod queue;
mod state_machine;

pub use conflict::{
    Conflict, ConflictDetector, ConflictTask, ConflictType, ResolutionOutcome, ResolutionStrategy,
    Severity,
};
pub use preview::{ChangeKind, NodeChange, PreviewResult, PreviewService, ESTIMATED_MS_PER_COMMAND};
pub use queue::{CommandQueue, QueueStats, StatusUpdate};
pub use state_machine::{transition, QueueEvent, Transition};
