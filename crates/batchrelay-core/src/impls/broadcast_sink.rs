//! BroadcastStateSink - fans controller broadcasts out over a tokio
//! broadcast channel.

use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::StateUpdate;
use crate::ports::StateSink;

pub struct BroadcastStateSink {
    sender: broadcast::Sender<StateUpdate>,
}

impl BroadcastStateSink {
    pub fn new(sender: broadcast::Sender<StateUpdate>) -> Self {
        Self { sender }
    }
}

impl StateSink for BroadcastStateSink {
    fn publish(&self, update: StateUpdate) {
        // no listener attached is normal (UI closed)
        if let Err(err) = self.sender.send(update) {
            trace!(phase = ?err.0.phase(), "broadcast without listeners dropped");
        }
    }
}
