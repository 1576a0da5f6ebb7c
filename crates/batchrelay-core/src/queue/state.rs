//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Pending -> Submitting -> InProgress -> Succeeded
/// - Pending -> Submitting -> InProgress -> Failed
/// - Submitting | InProgress -> Failed (interaction failure, counterpart closed)
///
/// Statuses only move forward. `rank()` gives the position in that order. A
/// pending task only leaves `Pending` through dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,

    /// Handed to the agent; the page has not confirmed the submission yet.
    Submitting,

    /// The page accepted the request and is generating.
    InProgress,

    Succeeded,

    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// Is this task eligible for dispatch?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    /// Is the task currently owned by the agent?
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Submitting | TaskStatus::InProgress)
    }

    fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Submitting => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Succeeded | TaskStatus::Failed => 3,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only order.
    ///
    /// Re-entering the same non-terminal status is allowed (progress updates).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(next, TaskStatus::Pending | TaskStatus::Submitting),
            TaskStatus::Succeeded | TaskStatus::Failed => false,
            TaskStatus::Submitting | TaskStatus::InProgress => next.rank() >= self.rank(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Submitting => "SUBMITTING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskStatus::Pending, TaskStatus::Submitting, true)]
    #[case(TaskStatus::Submitting, TaskStatus::InProgress, true)]
    #[case(TaskStatus::InProgress, TaskStatus::InProgress, true)]
    #[case(TaskStatus::InProgress, TaskStatus::Succeeded, true)]
    #[case(TaskStatus::Submitting, TaskStatus::Failed, true)]
    #[case(TaskStatus::Pending, TaskStatus::Failed, false)]
    #[case(TaskStatus::Pending, TaskStatus::InProgress, false)]
    #[case(TaskStatus::Pending, TaskStatus::Succeeded, false)]
    #[case(TaskStatus::InProgress, TaskStatus::Submitting, false)]
    #[case(TaskStatus::Submitting, TaskStatus::Pending, false)]
    #[case(TaskStatus::Succeeded, TaskStatus::Failed, false)]
    #[case(TaskStatus::Failed, TaskStatus::Failed, false)]
    fn transitions_only_move_forward(
        #[case] from: TaskStatus,
        #[case] to: TaskStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn serializes_screaming_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!(TaskStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn terminal_and_active_are_disjoint() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Submitting,
            TaskStatus::InProgress,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
        ] {
            assert!(!(s.is_terminal() && s.is_active()));
        }
    }
}
