use serde::{Deserialize, Serialize};

use crate::queue::{Task, TaskStatus};

/// Per-status task counts of the current batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub submitting: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Submitting => counts.submitting += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.submitting + self.in_progress + self.succeeded + self.failed
    }

    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }
}
