//! Dry-run preview of a batch of commands
//!
//! Classification is static: the live document is never read.

use quill_core::{Command, CommandKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed per-command execution estimate
pub const ESTIMATED_MS_PER_COMMAND: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Move,
}

/// Predicted effect of one command on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeChange {
    pub node_id: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub changes: Vec<NodeChange>,
    pub affected_nodes: Vec<String>,
    pub warnings: Vec<String>,
    pub can_execute: bool,
    pub estimated_duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PreviewService;

impl PreviewService {
    pub fn new() -> Self {
        Self
    }

    pub fn preview(&self, commands: &[Command]) -> PreviewResult {
        let mut changes = Vec::with_capacity(commands.len());
        let mut affected_nodes: Vec<String> = Vec::new();
        let mut warnings = Vec::new();

        for command in commands {
            let change = classify(command);

            if change.kind == ChangeKind::Delete {
                warnings.push(format!(
                    "Warning: {} will remove node {}",
                    command.command, change.node_id
                ));
            }

            for id in command.node_refs() {
                if !affected_nodes.contains(&id) {
                    affected_nodes.push(id);
                }
            }

            changes.push(change);
        }

        // Only warnings carrying the marker are advisory
        let can_execute = warnings.iter().all(|w| w.contains("Warning"));

        PreviewResult {
            changes,
            affected_nodes,
            warnings,
            can_execute,
            estimated_duration_ms: commands.len() as u64 * ESTIMATED_MS_PER_COMMAND,
        }
    }
}

fn classify(command: &Command) -> NodeChange {
    let target = command
        .target_node()
        .map(str::to_string)
        .unwrap_or_else(|| format!("new:{}", command.id));
    let after = (!command.params.is_empty()).then(|| Value::Object(command.params.clone()));

    let (node_id, kind, description) = match command.command {
        CommandKind::CreateFrame
        | CommandKind::CreateRectangle
        | CommandKind::CreateEllipse
        | CommandKind::CreateText
        | CommandKind::CreateComponent
        | CommandKind::CreateInstance => {
            let description = match &command.parent {
                Some(parent) => format!("{} under {}", command.command, parent),
                None => format!("{} at page root", command.command),
            };
            (format!("new:{}", command.id), ChangeKind::Create, description)
        }
        CommandKind::Duplicate => (
            format!("new:{}", command.id),
            ChangeKind::Create,
            format!("duplicate {}", target),
        ),
        CommandKind::Group => (
            format!("new:{}", command.id),
            ChangeKind::Create,
            format!("group {} node(s)", command.node_refs().len()),
        ),
        CommandKind::Delete => (target.clone(), ChangeKind::Delete, format!("delete {}", target)),
        CommandKind::Ungroup => (
            target.clone(),
            ChangeKind::Delete,
            format!("ungroup {}", target),
        ),
        CommandKind::Move => (target.clone(), ChangeKind::Move, format!("move {}", target)),
        CommandKind::SetText
        | CommandKind::SetFill
        | CommandKind::SetStroke
        | CommandKind::SetCornerRadius
        | CommandKind::SetAutoLayout
        | CommandKind::SetProperties
        | CommandKind::ApplyStyle
        | CommandKind::Rename
        | CommandKind::Resize => (
            target.clone(),
            ChangeKind::Update,
            format!("{} on {}", command.command, target),
        ),
    };

    NodeChange {
        node_id,
        kind,
        before: None,
        after: if kind == ChangeKind::Delete { None } else { after },
        description,
    }
}
