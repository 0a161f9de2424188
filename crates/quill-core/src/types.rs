//! Core type definitions for the Quill command bridge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{QuillError, Result};

/// Wire protocol version stamped on every command envelope
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default command timeout when the caller does not supply one
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Scheduling tier controlling queue draw order (lower rank is served first)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Interactive = 0,
    #[default]
    Batch = 1,
    Refactor = 2,
    Low = 3,
}

impl Priority {
    /// All tiers in draw order
    pub const ALL: [Priority; 4] = [
        Priority::Interactive,
        Priority::Batch,
        Priority::Refactor,
        Priority::Low,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Batch => write!(f, "batch"),
            Self::Refactor => write!(f, "refactor"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interactive" | "0" => Ok(Self::Interactive),
            "batch" | "1" => Ok(Self::Batch),
            "refactor" | "2" => Ok(Self::Refactor),
            "low" | "3" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Lifecycle status of a queued command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Pending,
    Posted,
    Completed,
    Failed,
    Timeout,
}

impl CommandStatus {
    pub const ALL: [CommandStatus; 5] = [
        CommandStatus::Pending,
        CommandStatus::Posted,
        CommandStatus::Completed,
        CommandStatus::Failed,
        CommandStatus::Timeout,
    ];

    /// Completed, failed and timed-out commands never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Pending and posted commands are still visible to the agent
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Posted => write!(f, "posted"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "posted" => Ok(Self::Posted),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// The closed set of mutations the execution agent knows how to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    CreateFrame,
    CreateRectangle,
    CreateEllipse,
    CreateText,
    CreateComponent,
    CreateInstance,
    SetText,
    SetFill,
    SetStroke,
    SetCornerRadius,
    SetAutoLayout,
    SetProperties,
    ApplyStyle,
    Rename,
    Move,
    Resize,
    Delete,
    Duplicate,
    Group,
    Ungroup,
}

impl CommandKind {
    pub const ALL: [CommandKind; 20] = [
        CommandKind::CreateFrame,
        CommandKind::CreateRectangle,
        CommandKind::CreateEllipse,
        CommandKind::CreateText,
        CommandKind::CreateComponent,
        CommandKind::CreateInstance,
        CommandKind::SetText,
        CommandKind::SetFill,
        CommandKind::SetStroke,
        CommandKind::SetCornerRadius,
        CommandKind::SetAutoLayout,
        CommandKind::SetProperties,
        CommandKind::ApplyStyle,
        CommandKind::Rename,
        CommandKind::Move,
        CommandKind::Resize,
        CommandKind::Delete,
        CommandKind::Duplicate,
        CommandKind::Group,
        CommandKind::Ungroup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateFrame => "create_frame",
            Self::CreateRectangle => "create_rectangle",
            Self::CreateEllipse => "create_ellipse",
            Self::CreateText => "create_text",
            Self::CreateComponent => "create_component",
            Self::CreateInstance => "create_instance",
            Self::SetText => "set_text",
            Self::SetFill => "set_fill",
            Self::SetStroke => "set_stroke",
            Self::SetCornerRadius => "set_corner_radius",
            Self::SetAutoLayout => "set_auto_layout",
            Self::SetProperties => "set_properties",
            Self::ApplyStyle => "apply_style",
            Self::Rename => "rename",
            Self::Move => "move",
            Self::Resize => "resize",
            Self::Delete => "delete",
            Self::Duplicate => "duplicate",
            Self::Group => "group",
            Self::Ungroup => "ungroup",
        }
    }

    /// Kinds that trigger a pre-mutation backup of the whole document
    pub fn is_modifying(self) -> bool {
        matches!(
            self,
            Self::Move
                | Self::Delete
                | Self::Resize
                | Self::SetProperties
                | Self::Duplicate
                | Self::Group
                | Self::Ungroup
        )
    }

    /// Kinds that bring a new node into existence
    pub fn is_create(self) -> bool {
        matches!(
            self,
            Self::CreateFrame
                | Self::CreateRectangle
                | Self::CreateEllipse
                | Self::CreateText
                | Self::CreateComponent
                | Self::CreateInstance
        )
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("Unknown command kind: {}", s))
    }
}

/// Envelope tag distinguishing commands from responses on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Command,
    Response,
}

/// A requested design mutation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default = "command_tag")]
    pub kind: MessageKind,
    #[serde(default = "protocol_version")]
    pub version: String,
    pub id: String,
    pub command: CommandKind,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn command_tag() -> MessageKind {
    MessageKind::Command
}

fn response_tag() -> MessageKind {
    MessageKind::Response
}

fn protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

/// Param keys that name a single existing node
const NODE_PARAM_KEYS: [&str; 4] = ["nodeId", "targetId", "parentId", "componentId"];

impl Command {
    /// Create a command with a freshly generated id
    pub fn new(command: CommandKind, params: Map<String, Value>) -> Self {
        Self {
            kind: MessageKind::Command,
            version: protocol_version(),
            id: Uuid::new_v4().to_string(),
            command,
            params,
            parent: None,
            idempotency_key: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// The node this command acts on, if it names one
    pub fn target_node(&self) -> Option<&str> {
        if let Some(id) = self.params.get("nodeId").and_then(Value::as_str) {
            return Some(id);
        }
        self.params
            .get("nodeIds")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
    }

    /// Every node id this command references: target, parent and node params
    pub fn node_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        let mut push = |id: &str| {
            if !id.is_empty() && !refs.iter().any(|r| r == id) {
                refs.push(id.to_string());
            }
        };

        for key in NODE_PARAM_KEYS {
            if let Some(id) = self.params.get(key).and_then(Value::as_str) {
                push(id);
            }
        }
        if let Some(ids) = self.params.get("nodeIds").and_then(Value::as_array) {
            for id in ids.iter().filter_map(Value::as_str) {
                push(id);
            }
        }
        if let Some(parent) = &self.parent {
            push(parent);
        }
        refs
    }

    /// Boundary validation for commands arriving from outside the process
    pub fn validate(&self) -> Result<()> {
        if self.kind != MessageKind::Command {
            return Err(QuillError::Validation(
                "envelope kind must be \"command\"".to_string(),
            ));
        }
        if self.id.trim().is_empty() {
            return Err(QuillError::Validation("command id is empty".to_string()));
        }
        if self.command.is_create() {
            return Ok(());
        }
        if self.target_node().is_none() {
            return Err(QuillError::Validation(format!(
                "{} requires a nodeId or nodeIds param",
                self.command
            )));
        }
        Ok(())
    }
}

/// Agent-reported outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Pending,
}

/// Structured failure reported by the execution agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Result of executing a command, as reported by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    #[serde(default = "response_tag")]
    pub kind: MessageKind,
    pub command_id: String,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Milliseconds the agent spent executing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Value>>,
}

impl CommandResponse {
    fn base(command_id: impl Into<String>, status: ResponseStatus) -> Self {
        Self {
            kind: MessageKind::Response,
            command_id: command_id.into(),
            status,
            result: None,
            error: None,
            timestamp: Utc::now(),
            execution_time: None,
            artifacts: None,
        }
    }

    pub fn success(command_id: impl Into<String>, result: Value) -> Self {
        let mut response = Self::base(command_id, ResponseStatus::Success);
        response.result = Some(result);
        response
    }

    pub fn error(
        command_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut response = Self::base(command_id, ResponseStatus::Error);
        response.error = Some(ResponseError {
            code: code.into(),
            message: message.into(),
            details: None,
        });
        response
    }

    pub fn pending(command_id: impl Into<String>) -> Self {
        Self::base(command_id, ResponseStatus::Pending)
    }

    /// Synthetic response attached when a posted command outlives its deadline
    pub fn timed_out(command_id: impl Into<String>, timeout_at: DateTime<Utc>) -> Self {
        let mut response = Self::error(
            command_id,
            "TIMEOUT",
            "Command was not resolved before its deadline",
        );
        if let Some(error) = response.error.as_mut() {
            error.details = Some(serde_json::json!({ "timeoutAt": timeout_at }));
        }
        response
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time = Some(ms);
        self
    }

    /// Boundary validation for responses posted by the agent
    pub fn validate(&self) -> Result<()> {
        if self.kind != MessageKind::Response {
            return Err(QuillError::Validation(
                "envelope kind must be \"response\"".to_string(),
            ));
        }
        if self.command_id.trim().is_empty() {
            return Err(QuillError::Validation("commandId is empty".to_string()));
        }
        match self.status {
            ResponseStatus::Error if self.error.is_none() => Err(QuillError::Validation(
                "error responses must carry an error object".to_string(),
            )),
            ResponseStatus::Success if self.error.is_some() => Err(QuillError::Validation(
                "success responses must not carry an error object".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// A command held by the queue together with its delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedCommand {
    pub command: Command,
    pub file_key: String,
    pub status: CommandStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Fixed at enqueue, never moved
    pub timeout_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CommandResponse>,
}

impl QueuedCommand {
    pub fn id(&self) -> &str {
        &self.command.id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Interactive < Priority::Batch);
        assert!(Priority::Batch < Priority::Refactor);
        assert!(Priority::Refactor < Priority::Low);
        assert_eq!(Priority::default(), Priority::Batch);
        assert_eq!("REFACTOR".parse::<Priority>().unwrap(), Priority::Refactor);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Posted.is_terminal());
        assert!(CommandStatus::Completed.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_modifying_set() {
        let modifying: Vec<_> = CommandKind::ALL
            .iter()
            .filter(|k| k.is_modifying())
            .map(|k| k.as_str())
            .collect();
        assert_eq!(
            modifying,
            vec!["set_properties", "move", "resize", "delete", "duplicate", "group", "ungroup"]
        );
    }

    #[test]
    fn test_command_kind_parse_accepts_dashes() {
        assert_eq!(
            "set-properties".parse::<CommandKind>().unwrap(),
            CommandKind::SetProperties
        );
        assert!("explode".parse::<CommandKind>().is_err());
    }

    #[test]
    fn test_unknown_kind_rejected_on_wire() {
        let raw = json!({
            "kind": "command",
            "version": "1.0",
            "id": "c1",
            "command": "explode",
            "params": {},
            "timestamp": "2024-01-01T00:00:00Z"
        });
        assert!(serde_json::from_value::<Command>(raw).is_err());
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd = Command::new(CommandKind::Move, Map::new())
            .with_param("nodeId", "1:2")
            .with_parent("0:1")
            .with_idempotency_key("move-once");
        let value = serde_json::to_value(&cmd).unwrap();

        assert_eq!(value["kind"], "command");
        assert_eq!(value["version"], PROTOCOL_VERSION);
        assert_eq!(value["command"], "move");
        assert_eq!(value["parent"], "0:1");
        assert_eq!(value["idempotencyKey"], "move-once");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_node_refs_collects_and_dedupes() {
        let cmd = Command::new(CommandKind::Group, Map::new())
            .with_param("nodeIds", json!(["1:2", "1:3", "1:2"]))
            .with_param("parentId", "0:1")
            .with_parent("0:1");
        assert_eq!(cmd.node_refs(), vec!["0:1", "1:2", "1:3"]);
        assert_eq!(cmd.target_node(), Some("1:2"));
    }

    #[test]
    fn test_validate_requires_target_for_updates() {
        let cmd = Command::new(CommandKind::Delete, Map::new());
        assert!(matches!(cmd.validate(), Err(QuillError::Validation(_))));

        let cmd = Command::new(CommandKind::CreateFrame, Map::new());
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_response_validation() {
        let ok = CommandResponse::success("c1", json!({"nodeId": "1:9"}));
        assert!(ok.validate().is_ok());

        let mut bad = CommandResponse::pending("c1");
        bad.status = ResponseStatus::Error;
        assert!(bad.validate().is_err());

        let mut wrong_kind = CommandResponse::success("c1", json!(null));
        wrong_kind.kind = MessageKind::Command;
        assert!(wrong_kind.validate().is_err());
    }

    #[test]
    fn test_response_parses_minimal_wire() {
        let raw = json!({
            "kind": "response",
            "commandId": "c1",
            "status": "error",
            "error": {"code": "NODE_NOT_FOUND", "message": "gone"},
            "executionTime": 12
        });
        let response: CommandResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.execution_time, Some(12));
        assert_eq!(response.error.unwrap().code, "NODE_NOT_FOUND");
    }
}
