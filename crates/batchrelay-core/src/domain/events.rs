//! Events - what the agent reports and what the controller announces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NotificationId, TaskId};
use crate::queue::TaskStatus;

/// Outcome event produced by the page agent for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentEvent {
    /// The page accepted the request and assigned it an external id.
    Submitted {
        task_id: TaskId,
        external_id: String,
        at: DateTime<Utc>,
    },

    /// Progress or outcome observed on the page.
    StatusChanged(StatusChange),

    /// The page interaction itself failed (field not found, click failed...).
    InteractionFailed { task_id: TaskId, error: String },
}

/// A status observation. At least one of `task_id` / `external_id` should be
/// present; page-side observations usually only know the external id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub external_id: Option<String>,
    pub status: TaskStatus,
    /// Fraction in `0.0..=1.0`.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result_ref: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusChange {
    pub fn for_external(external_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: None,
            external_id: Some(external_id.into()),
            status,
            progress: None,
            result_ref: None,
            error: None,
        }
    }

    pub fn for_task(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id: Some(task_id),
            external_id: None,
            status,
            progress: None,
            result_ref: None,
            error: None,
        }
    }
}

/// What just happened, as announced with the next state broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    BatchStarted,
    TaskStarted,
    TaskUpdated,
    TaskFinished,
    BatchCompleted,
    BatchStopped,
}

/// A one-shot announcement. Delivered at most once per `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<TaskId>,
    pub id: NotificationId,
}
