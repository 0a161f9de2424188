//! Unified error types for Quill

use thiserror::Error;

use crate::CommandStatus;

/// Unified error type for all Quill operations
#[derive(Error, Debug)]
pub enum QuillError {
    // Boundary errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Queue errors
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Invalid transition for command {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: CommandStatus,
        to: CommandStatus,
    },

    #[error("Command timed out: {0}")]
    CommandTimedOut(String),

    #[error("Command {id} failed [{code}]: {message}")]
    CommandFailed {
        id: String,
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Gave up waiting for command {id} after {waited_ms}ms")]
    WaitTimeout { id: String, waited_ms: u64 },

    // Upstream errors
    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Upstream API unavailable: {0}")]
    UpstreamUnavailable(String),

    // Backup errors
    #[error("Backup error: {0}")]
    Backup(String),

    // Server errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Port {0} is in use")]
    PortInUse(u16),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl QuillError {
    /// Stable machine-readable code, used in HTTP error bodies
    pub fn code(&self) -> &str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CommandNotFound(_) => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::CommandTimedOut(_) => "TIMEOUT",
            Self::CommandFailed { code, .. } => code,
            Self::WaitTimeout { .. } => "WAIT_TIMEOUT",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::Backup(_) => "BACKUP_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::PortInUse(_) => "PORT_IN_USE",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code this error maps to at the bridge boundary
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Serialization(_) => 400,
            Self::CommandNotFound(_) => 404,
            Self::InvalidTransition { .. } => 409,
            Self::CommandFailed { .. } => 422,
            Self::CommandTimedOut(_) | Self::WaitTimeout { .. } => 504,
            Self::Upstream(_) => 502,
            Self::UpstreamUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// Structured details, if the error carries any
    ///
    /// Errors about a specific command always include its `commandId`. Agent
    /// supplied object details are merged in; anything else is kept under
    /// `agentDetails`.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::CommandFailed { id, details, .. } => {
                let mut merged = match details {
                    Some(serde_json::Value::Object(map)) => map.clone(),
                    Some(other) => {
                        let mut map = serde_json::Map::new();
                        map.insert("agentDetails".to_string(), other.clone());
                        map
                    }
                    None => serde_json::Map::new(),
                };
                merged.insert("commandId".to_string(), id.clone().into());
                Some(serde_json::Value::Object(merged))
            }
            Self::WaitTimeout { id, .. } | Self::CommandTimedOut(id) => {
                Some(serde_json::json!({ "commandId": id }))
            }
            _ => None,
        }
    }
}

/// Result type alias using QuillError
pub type Result<T> = std::result::Result<T, QuillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(QuillError::Validation("bad".into()).status_code(), 400);
        assert_eq!(QuillError::CommandNotFound("x".into()).status_code(), 404);
        assert_eq!(
            QuillError::WaitTimeout {
                id: "x".into(),
                waited_ms: 10
            }
            .status_code(),
            504
        );
        assert_eq!(QuillError::Other("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_command_failed_keeps_agent_code() {
        let err = QuillError::CommandFailed {
            id: "c1".to_string(),
            code: "NODE_NOT_FOUND".to_string(),
            message: "no such node".to_string(),
            details: Some(serde_json::json!({"nodeId": "1:2"})),
        };
        assert_eq!(err.code(), "NODE_NOT_FOUND");
        let details = err.details().unwrap();
        assert_eq!(details["nodeId"], "1:2");
        assert_eq!(details["commandId"], "c1");
        assert!(err.to_string().contains("no such node"));
    }

    #[test]
    fn test_timeouts_name_the_command() {
        let wait = QuillError::WaitTimeout {
            id: "c2".into(),
            waited_ms: 5,
        };
        assert_eq!(wait.details().unwrap()["commandId"], "c2");
        let expired = QuillError::CommandTimedOut("c3".into());
        assert_eq!(expired.details().unwrap()["commandId"], "c3");
        assert!(QuillError::Validation("bad".into()).details().is_none());
    }

    #[test]
    fn test_scalar_agent_details_kept() {
        let err = QuillError::CommandFailed {
            id: "c4".into(),
            code: "E".into(),
            message: "m".into(),
            details: Some(serde_json::json!("raw")),
        };
        let details = err.details().unwrap();
        assert_eq!(details["agentDetails"], "raw");
        assert_eq!(details["commandId"], "c4");
    }
}
