//! IdGenerator port - id creation behind a trait so tests can pin the
//! timestamp part.

use crate::domain::ids::{CorrelationId, Id, IdMarker, NotificationId, SessionId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator produces ULID-backed ids.
///
/// `Send + Sync` because the generator is shared between the controller loop
/// and the bridge.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_notification_id(&self) -> NotificationId;

    fn generate_correlation_id(&self) -> CorrelationId;

    fn generate_session_id(&self) -> SessionId;
}

/// ULID generator whose timestamp comes from a `Clock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Id::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        self.next()
    }

    fn generate_notification_id(&self) -> NotificationId {
        self.next()
    }

    fn generate_correlation_id(&self) -> CorrelationId {
        self.next()
    }

    fn generate_session_id(&self) -> SessionId {
        self.next()
    }
}
