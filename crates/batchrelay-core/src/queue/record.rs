//! Task record: one prompt of a batch plus its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;
use crate::domain::{AspectRatio, TaskId};

/// A single generation request and what is known about it.
///
/// Design:
/// - This is the single source of truth for a task's status.
/// - The controller owns every `Task`; other contexts only see clones.
/// - All transitions go through the `mark_*` methods, which keep
///   `external_id` write-once and `progress` scoped to `InProgress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// 1-based position in the batch at creation time.
    pub original_index: u32,

    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub image_quantity: u32,
    pub status: TaskStatus,

    /// Id the target page assigned once the submission went through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Percentage, only while `InProgress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: TaskId,
        original_index: u32,
        prompt: impl Into<String>,
        aspect_ratio: AspectRatio,
        image_quantity: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            original_index,
            prompt: prompt.into(),
            aspect_ratio,
            image_quantity,
            status: TaskStatus::Pending,
            external_id: None,
            progress: None,
            result_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the external id unless one is already set.
    ///
    /// Returns `false` when a different id was already recorded.
    pub fn assign_external_id(&mut self, external_id: &str) -> bool {
        match &self.external_id {
            None => {
                self.external_id = Some(external_id.to_string());
                true
            }
            Some(existing) => existing == external_id,
        }
    }

    /// Pending -> Submitting.
    pub fn mark_submitting(&mut self, now: DateTime<Utc>) {
        self.set_status(TaskStatus::Submitting, now);
    }

    /// Submitting -> InProgress, with the page's id for the request.
    pub fn mark_submitted(&mut self, external_id: &str, at: DateTime<Utc>) {
        self.assign_external_id(external_id);
        self.set_status(TaskStatus::InProgress, at);
    }

    /// Apply a status reported by the agent. Callers check
    /// `can_transition_to` first.
    pub fn apply_status(&mut self, status: TaskStatus, progress: Option<u8>, now: DateTime<Utc>) {
        self.set_status(status, now);
        if status == TaskStatus::InProgress && progress.is_some() {
            self.progress = progress;
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.error = Some(error.into());
        self.set_status(TaskStatus::Failed, now);
    }

    fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        if status != TaskStatus::InProgress {
            self.progress = None;
        }
        self.updated_at = now;
    }
}

/// Convert a `0.0..=1.0` fraction into a clamped percentage.
pub fn progress_percent(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}
