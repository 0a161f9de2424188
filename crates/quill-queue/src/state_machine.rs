//! Pure state machine for command delivery
//!
//! This module has NO I/O and no knowledge of the queue's storage.
//! All transitions are deterministic and testable.
//!
//! - Pure function: transition(status, event) -> new status or rejection
//! - Terminal statuses reject every event
//! - Nothing ever moves back to `pending`; retry is a new command

use quill_core::CommandStatus;

/// Events that drive a queued command forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// The agent acknowledged delivery (or reported progress)
    Delivered,
    /// The agent reported success
    Succeeded,
    /// The agent reported an error
    Failed,
    /// The deadline passed while the command was posted
    DeadlinePassed,
    /// Someone asked to put the command back in the queue
    Requeue,
}

impl QueueEvent {
    /// Event that would move a command into `target`
    pub fn for_target(target: CommandStatus) -> Self {
        match target {
            CommandStatus::Pending => Self::Requeue,
            CommandStatus::Posted => Self::Delivered,
            CommandStatus::Completed => Self::Succeeded,
            CommandStatus::Failed => Self::Failed,
            CommandStatus::Timeout => Self::DeadlinePassed,
        }
    }
}

/// Outcome of applying an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The command moves (or stays) in the given status
    To(CommandStatus),
    /// The event is not valid from the current status
    Rejected { reason: String },
}

impl Transition {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::To(_))
    }
}

/// Pure transition function
///
/// The graph is `pending -> posted -> {completed, failed, timeout}`. A
/// response may arrive before the delivery acknowledgement, so `pending`
/// can also resolve directly to `completed` or `failed`. Deadlines only
/// apply once delivery is acknowledged: `pending` never times out.
pub fn transition(status: CommandStatus, event: QueueEvent) -> Transition {
    use CommandStatus::*;
    use QueueEvent::*;

    match (status, event) {
        (Pending, Delivered) | (Posted, Delivered) => Transition::To(Posted),

        (Pending, Succeeded) | (Posted, Succeeded) => Transition::To(Completed),
        (Pending, QueueEvent::Failed) | (Posted, QueueEvent::Failed) => {
            Transition::To(CommandStatus::Failed)
        }

        (Posted, DeadlinePassed) => Transition::To(Timeout),
        (Pending, DeadlinePassed) => Transition::Rejected {
            reason: "pending commands do not time out until delivered".to_string(),
        },

        (Pending, Requeue) | (Posted, Requeue) => Transition::Rejected {
            reason: "commands never return to pending; submit a new command".to_string(),
        },

        (terminal, event) => Transition::Rejected {
            reason: format!("{} is terminal; {:?} ignored", terminal, event),
        },
    }
}
