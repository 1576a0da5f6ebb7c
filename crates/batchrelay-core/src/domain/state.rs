//! Run state - what the controller is doing right now.

use serde::{Deserialize, Serialize};

use crate::queue::Task;

/// Controller phase.
///
/// - Idle: nothing queued or the last batch ended
/// - Running: a batch is being worked through
/// - Configuring: reserved for settings edits; commands are rejected like
///   in `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Configuring,
}

/// Read-only snapshot of the controller's run state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunState {
    pub phase: RunPhase,
    pub queue: Vec<Task>,
    pub active: Option<Task>,
    pub inter_task_delay_ms: u64,
}

impl RunState {
    pub fn is_idle(&self) -> bool {
        self.phase == RunPhase::Idle
    }
}
