//! StateSink port - where controller broadcasts go.

use crate::domain::StateUpdate;

/// Receives every state broadcast of the controller.
///
/// Fire-and-forget: the controller neither waits for nor retries delivery.
pub trait StateSink: Send + Sync {
    fn publish(&self, update: StateUpdate);
}
