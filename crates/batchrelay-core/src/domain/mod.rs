//! Domain model (ids, batch parameters, run state, events, messages, errors).

pub mod batch;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod state;

pub use batch::{AspectRatio, BatchSpec, ParseAspectRatioError};
pub use errors::{BridgeError, ConfigError, ControllerError, TransportError};
pub use events::{AgentEvent, Notification, NotificationKind, StatusChange};
pub use ids::{CorrelationId, NotificationId, SessionId, TaskId};
pub use messages::{AgentCommand, AgentMessage, ControllerReply, StateUpdate, UiCommand, UiInbound};
pub use state::{RunPhase, RunState};
