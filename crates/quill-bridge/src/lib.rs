//! # quill-bridge
//!
//! HTTP bridge between the tool layer and the polling execution agent.
//!
//! The agent cannot be called into. It polls `GET /commands`, executes what
//! it finds, and reports back either on `POST /commands/:id/response` or as
//! a reply to the command's document comment. Callers submit through
//! `POST /commands` and may block until the command resolves.

pub mod backoff;
pub mod error;
pub mod handlers;
pub mod maintenance;
pub mod poller;
pub mod port;
pub mod relay;
pub mod resolve;
pub mod server;
pub mod state;
pub mod submit;

pub use backoff::{Backoff, BackoffPolicy};
pub use error::{ApiError, ApiResult};
pub use maintenance::MaintenanceTasks;
pub use poller::{CommandPoller, PollReport};
pub use port::bind_with_reclaim;
pub use relay::extract_response;
pub use resolve::apply_response;
pub use server::{router, BridgeServer};
pub use state::{BridgeState, BridgeStateBuilder, CurrentFile, SharedState};
pub use submit::{CommandSpec, SubmitOutcome, SubmitRequest};
