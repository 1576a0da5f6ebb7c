//! Messages exchanged between the three contexts.
//!
//! One closed enum per direction, so every receiver matches exhaustively.

use serde::{Deserialize, Serialize};

use super::{AgentEvent, BatchSpec, CorrelationId, Notification, RunPhase, RunState};
use crate::queue::Task;

/// UI -> Controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UiCommand {
    StartBatch(BatchSpec),
    Stop,
    GetState,
    SetDelay { seconds: u64 },
}

impl UiCommand {
    pub fn name(&self) -> &'static str {
        match self {
            UiCommand::StartBatch(_) => "START_BATCH",
            UiCommand::Stop => "STOP",
            UiCommand::GetState => "GET_STATE",
            UiCommand::SetDelay { .. } => "SET_DELAY",
        }
    }
}

/// Controller -> UI broadcast: full state plus the pending notification.
///
/// `revision` counts the controller's broadcasts; a state snapshot carries
/// the revision of the last broadcast it reflects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(flatten)]
    pub state: RunState,
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_notification: Option<Notification>,
}

impl StateUpdate {
    pub fn phase(&self) -> RunPhase {
        self.state.phase
    }
}

/// Controller's direct answer to one relayed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControllerReply {
    Ack { success: bool, message: String },
    State(StateUpdate),
    Pong,
}

impl ControllerReply {
    pub fn ok(message: impl Into<String>) -> Self {
        ControllerReply::Ack {
            success: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        ControllerReply::Ack {
            success: false,
            message: message.into(),
        }
    }
}

/// Controller -> Agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentCommand {
    ExecuteTask { task: Task },
    /// Discard any cached per-task context (batch ended or stopped).
    ClearContext,
    Ping,
}

/// Agent -> Controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentMessage {
    AgentReady {
        #[serde(default)]
        page_url: Option<String>,
    },
    Event(AgentEvent),
    /// The agent's page context is gone (tab closed, navigated away).
    Closed,
}

/// Bridge -> UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UiInbound {
    /// A controller broadcast. `resync` marks a snapshot fetched after a
    /// reconnect; it supersedes everything received before it.
    State { update: StateUpdate, resync: bool },

    /// Direct response to a relayed command.
    Response {
        correlation_id: CorrelationId,
        reply: ControllerReply,
    },

    /// A command could not be delivered after all retries.
    CommunicationError {
        reason: String,
        original: UiCommand,
        #[serde(default)]
        correlation_id: Option<CorrelationId>,
    },
}
