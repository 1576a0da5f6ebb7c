//! Agent ports.
//!
//! - `AgentPort`: the controller's end of the link to the page agent.
//! - `AgentReporter`: the agent's end, carrying events back.
//! - `PageAutomation`: the page-specific interaction the agent performs
//!   (fill the prompt, press send). Replaceable; the core never looks inside.

use async_trait::async_trait;

use crate::domain::{AgentCommand, AgentMessage, TransportError};
use crate::queue::Task;

/// Controller -> Agent link.
///
/// `send` is fire-and-forget: `Ok` means the agent context received the
/// command, not that the task did anything. Outcomes come back as
/// `AgentMessage`s.
#[async_trait]
pub trait AgentPort: Send + Sync {
    async fn send(&self, command: AgentCommand) -> Result<(), TransportError>;

    /// Liveness check; the agent answers with a pong.
    async fn ping(&self) -> Result<(), TransportError>;
}

/// Agent -> Controller link.
#[async_trait]
pub trait AgentReporter: Send + Sync {
    async fn report(&self, message: AgentMessage) -> Result<(), TransportError>;
}

/// The page interaction for one task.
///
/// Implementations return `Err(reason)` when the interaction itself failed
/// (the agent turns that into `InteractionFailed`). A successful return only
/// means the request was sent; confirmation arrives through the page's
/// network hook.
#[async_trait]
pub trait PageAutomation: Send + Sync {
    async fn submit(&self, task: &Task) -> Result<(), String>;

    /// Drop per-task page state (ratio/quantity overrides and the like).
    async fn clear(&self) {}
}
