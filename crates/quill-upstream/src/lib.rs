//! # quill-upstream
//!
//! Read-only access to the remote design document and the backup service
//! built on it.
//!
//! This crate provides:
//! - `DocumentApi` trait with an HTTP implementation behind a circuit breaker
//! - `CachedDocumentApi` read-through wrapper over `quill-cache`
//! - `MockDocumentApi` for tests
//! - `BackupService` snapshotting documents before modifying commands

mod api;
mod backup;
mod cached;
mod circuit_breaker;
mod http;
pub mod mock;
mod store;

pub use api::{Comment, CommentUser, DocumentApi, DocumentSnapshot};
pub use backup::{BackupMetadata, BackupService};
pub use cached::CachedDocumentApi;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use http::HttpDocumentApi;
pub use mock::MockDocumentApi;
pub use store::{BackupStore, FileBackupStore, MemoryBackupStore};
