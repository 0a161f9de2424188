//! # quill-core
//!
//! Core types for the Quill command bridge.
//!
//! Quill lets a tool layer request mutations to a remote design document that
//! cannot be called into directly. Commands are queued here, pulled by a
//! sandboxed execution agent that polls the bridge, and resolved when the
//! agent reports back.
//!
//! ## Core Paradigm
//!
//! - Commands are immutable requests with a closed set of kinds
//! - Queue status only moves forward; terminal states never change
//! - The execution agent is never called, only polled by
//! - Safety services (conflicts, preview, backup) are advisory

pub mod clock;
pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use clock::{deadline_after, Clock, ManualClock, SystemClock};
pub use config::QuillConfig;
pub use error::{QuillError, Result};
pub use types::*;
