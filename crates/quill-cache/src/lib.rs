//! # quill-cache
//!
//! TTL cache in front of expensive upstream reads.
//!
//! Keys are colon-separated segments (`file:{key}:nodes:{ids}`). Entries
//! expire lazily on read, in bulk on a periodic sweep, or early through
//! pattern and event invalidation.

mod cache;
mod pattern;
mod resource;

pub use cache::{CacheEvent, CacheEventKind, CacheManager, CacheStats, DEFAULT_TTL};
pub use pattern::KeyPattern;
pub use resource::ResourceClass;
