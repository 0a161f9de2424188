//! Advisory conflict detection between in-flight commands
//!
//! Conflicts never block submission. Detection is a pairwise scan over the
//! node ids each task touches; resolution only decides a policy.

use quill_core::{Command, CommandStatus, QueuedCommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A unit of work checked for overlap: one or more commands on a target
#[derive(Debug, Clone)]
pub struct ConflictTask {
    pub id: String,
    pub status: CommandStatus,
    pub target: Option<String>,
    pub commands: Vec<Command>,
}

impl ConflictTask {
    /// Every node id the task touches: its target plus each command's refs
    pub fn node_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        if let Some(target) = &self.target {
            ids.insert(target.clone());
        }
        for command in &self.commands {
            ids.extend(command.node_refs());
        }
        ids
    }
}

impl From<&QueuedCommand> for ConflictTask {
    fn from(queued: &QueuedCommand) -> Self {
        Self {
            id: queued.id().to_string(),
            status: queued.status,
            target: queued.command.target_node().map(str::to_string),
            commands: vec![queued.command.clone()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    NodeOverlap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
}

/// Two in-flight tasks touching the same nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub task_id: String,
    pub conflicting_task_id: String,
    pub nodes: Vec<String>,
    pub severity: Severity,
    pub description: String,
}

/// Policy applied to a set of detected conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Run the tasks one after another, in submission order
    Sequence,
    /// Proceed and surface the conflicts to the caller
    Warn,
    /// Isolate each task on its own branch (not supported)
    Branch,
    /// Merge concurrent edits (not supported)
    Merge,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequence => write!(f, "sequence"),
            Self::Warn => write!(f, "warn"),
            Self::Branch => write!(f, "branch"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequence" => Ok(Self::Sequence),
            "warn" => Ok(Self::Warn),
            "branch" => Ok(Self::Branch),
            "merge" => Ok(Self::Merge),
            _ => Err(format!("Invalid resolution strategy: {}", s)),
        }
    }
}

/// Result of applying a strategy. No commands are mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub strategy: ResolutionStrategy,
    pub resolved: bool,
    pub message: String,
    pub warnings: Vec<String>,
    /// Task ids in the order they should run (sequence only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
}

/// Pairwise overlap scanner
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Conflicts between `task` and each other non-terminal task
    ///
    /// At most one conflict is reported per conflicting task.
    pub fn check_conflicts(&self, task: &ConflictTask, active: &[ConflictTask]) -> Vec<Conflict> {
        if task.status.is_terminal() {
            return Vec::new();
        }

        let ours = task.node_ids();
        let mut seen = BTreeSet::new();
        let mut conflicts = Vec::new();

        for other in active {
            if other.id == task.id || other.status.is_terminal() || seen.contains(&other.id) {
                continue;
            }

            let same_target = matches!(
                (&task.target, &other.target),
                (Some(a), Some(b)) if a == b
            );
            let theirs = other.node_ids();
            let nodes: Vec<String> = ours.intersection(&theirs).cloned().collect();

            if !same_target && nodes.is_empty() {
                continue;
            }

            seen.insert(other.id.clone());
            debug!(
                "Task {} overlaps {} on {} node(s)",
                task.id,
                other.id,
                nodes.len()
            );
            conflicts.push(Conflict {
                conflict_type: ConflictType::NodeOverlap,
                task_id: task.id.clone(),
                conflicting_task_id: other.id.clone(),
                description: format!(
                    "Task {} and task {} both modify node(s): {}",
                    task.id,
                    other.id,
                    nodes.join(", ")
                ),
                nodes,
                severity: Severity::Warning,
            });
        }

        conflicts
    }

    /// Convenience wrapper over queued commands
    pub fn check_queued(&self, command: &QueuedCommand, active: &[QueuedCommand]) -> Vec<Conflict> {
        let task = ConflictTask::from(command);
        let others: Vec<ConflictTask> = active.iter().map(ConflictTask::from).collect();
        self.check_conflicts(&task, &others)
    }

    /// Decide how to proceed given detected conflicts
    pub fn resolve_conflicts(
        &self,
        conflicts: &[Conflict],
        strategy: ResolutionStrategy,
    ) -> ResolutionOutcome {
        let unsupported = matches!(strategy, ResolutionStrategy::Branch | ResolutionStrategy::Merge);
        if conflicts.is_empty() && !unsupported {
            return ResolutionOutcome {
                strategy,
                resolved: true,
                message: "No conflicts".to_string(),
                warnings: Vec::new(),
                order: Vec::new(),
            };
        }

        match strategy {
            ResolutionStrategy::Sequence => {
                let mut order: Vec<String> = Vec::new();
                for conflict in conflicts {
                    for id in [&conflict.conflicting_task_id, &conflict.task_id] {
                        if !order.contains(id) {
                            order.push(id.clone());
                        }
                    }
                }
                ResolutionOutcome {
                    strategy,
                    resolved: true,
                    message: format!("{} task(s) will run in sequence", order.len()),
                    warnings: Vec::new(),
                    order,
                }
            }
            ResolutionStrategy::Warn => ResolutionOutcome {
                strategy,
                resolved: true,
                message: format!("Proceeding with {} conflict(s)", conflicts.len()),
                warnings: conflicts.iter().map(|c| c.description.clone()).collect(),
                order: Vec::new(),
            },
            ResolutionStrategy::Branch | ResolutionStrategy::Merge => {
                warn!("Resolution strategy {} is not supported", strategy);
                ResolutionOutcome {
                    strategy,
                    resolved: false,
                    message: format!("Strategy {} is not supported", strategy),
                    warnings: vec![format!(
                        "Warning: unsupported strategy {}; {} conflict(s) left unresolved",
                        strategy,
                        conflicts.len()
                    )],
                    order: Vec::new(),
                }
            }
        }
    }
}
