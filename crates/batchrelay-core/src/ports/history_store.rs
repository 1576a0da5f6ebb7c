//! HistoryStore port - per-session replay log for the UI.
//!
//! Not a queue of record: the controller never reads it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConfigError, SessionId, TaskId};
use crate::queue::TaskStatus;

/// Entries kept per session; older ones are dropped on save.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryEntryKind {
    User,
    System,
    TaskStatus,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryEntryKind,
    pub content: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl HistoryEntry {
    pub fn new(kind: HistoryEntryKind, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            content: content.into(),
            at,
            task_id: None,
            status: None,
            progress: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySession {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<HistoryEntry>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn current_session(&self) -> Result<Option<SessionId>, ConfigError>;

    /// Create an empty session and make it current.
    async fn create_session(&self) -> Result<SessionId, ConfigError>;

    async fn load(&self, id: SessionId) -> Result<Option<HistorySession>, ConfigError>;

    /// Overwrite the session's entries, keeping the last `HISTORY_LIMIT`.
    /// Unknown sessions are ignored.
    async fn save(&self, id: SessionId, entries: Vec<HistoryEntry>) -> Result<(), ConfigError>;

    /// `(id, created_at)` of every session, newest first.
    async fn list(&self) -> Result<Vec<(SessionId, DateTime<Utc>)>, ConfigError>;

    /// Remove a session; clears the current pointer if it pointed there.
    async fn delete(&self, id: SessionId) -> Result<(), ConfigError>;
}
