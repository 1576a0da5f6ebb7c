//! Link ports - the transport between the UI side and the controller.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::{ControllerReply, StateUpdate, TransportError, UiCommand};

/// Handle for one registered broadcast listener.
///
/// Dropping the handle revokes the registration, so re-registering after a
/// reconnect never leaves a duplicate listener behind.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<StateUpdate>,
}

impl Subscription {
    pub fn new(receiver: broadcast::Receiver<StateUpdate>) -> Self {
        Self { receiver }
    }

    /// Next broadcast, or `None` once the controller side is gone.
    ///
    /// A lagging listener skips to the newest broadcasts: every update is a
    /// full snapshot, so the latest one is enough.
    pub async fn recv(&mut self) -> Option<StateUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state listener lagged; skipping to newest broadcast");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// UI side -> Controller link.
#[async_trait]
pub trait ControllerLink: Send + Sync {
    /// Send one command and wait for the controller's direct reply.
    async fn request(&self, command: UiCommand) -> Result<ControllerReply, TransportError>;

    async fn ping(&self) -> Result<(), TransportError>;

    /// Register a listener for state broadcasts.
    fn subscribe(&self) -> Result<Subscription, TransportError>;
}

/// What a `ConnectionSupervisor` needs from the link it looks after.
#[async_trait]
pub trait SupervisedLink: Send + Sync {
    /// Lightweight liveness request. The supervisor applies the timeout.
    async fn ping(&self) -> Result<(), TransportError>;

    /// Drop and re-register the underlying listener.
    async fn reattach(&self) -> Result<(), TransportError>;

    /// Pull a full state snapshot and push it downstream.
    async fn resync(&self) -> Result<(), TransportError>;
}
