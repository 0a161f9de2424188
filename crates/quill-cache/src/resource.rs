//! Upstream resource classes and their cache keys

use quill_core::config::ResourceTtls;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    File,
    Nodes,
    Comments,
    Images,
    Styles,
}

impl ResourceClass {
    pub fn ttl(self, ttls: &ResourceTtls) -> Duration {
        let secs = match self {
            Self::File => ttls.file,
            Self::Nodes => ttls.nodes,
            Self::Comments => ttls.comments,
            Self::Images => ttls.images,
            Self::Styles => ttls.styles,
        };
        Duration::from_secs(secs)
    }

    /// Cache key for this class of resource within a file
    ///
    /// `detail` disambiguates requests, e.g. a sorted node id list.
    pub fn key(self, file_key: &str, detail: Option<&str>) -> String {
        let base = match self {
            Self::File => format!("file:{}", file_key),
            Self::Nodes => format!("file:{}:nodes", file_key),
            Self::Comments => format!("file:{}:comments", file_key),
            Self::Images => format!("file:{}:images", file_key),
            Self::Styles => format!("file:{}:styles", file_key),
        };
        match detail {
            Some(detail) if !detail.is_empty() => format!("{}:{}", base, detail),
            _ => base,
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Nodes => write!(f, "nodes"),
            Self::Comments => write!(f, "comments"),
            Self::Images => write!(f, "images"),
            Self::Styles => write!(f, "styles"),
        }
    }
}
