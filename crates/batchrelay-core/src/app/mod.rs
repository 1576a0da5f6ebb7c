//! App - the three runtime contexts and the plumbing between them.
//!
//! # Components
//! - **TaskQueueManager / ControllerService**: owns the run state and
//!   dispatches one task at a time
//! - **AgentHost**: page-side runtime around a `PageAutomation`
//! - **MessageBridge + ConnectionSupervisor**: UI <-> controller relay with
//!   heartbeat and bounded reconnection
//! - **AgentWatch**: heartbeat on the controller -> agent link
//! - **UiClient**: consumer of bridge output

pub mod agent_host;
pub mod agent_watch;
pub mod bridge;
pub mod controller;
pub mod service;
pub mod supervisor;
pub mod ui_client;

pub use self::agent_host::{AgentHost, AgentRequest, PageStatusReport, map_page_status};
pub use self::agent_watch::AgentWatch;
pub use self::bridge::MessageBridge;
pub use self::controller::{ControllerPorts, DelayTicket, TaskQueueManager};
pub use self::service::{ControllerHandle, ControllerInput, ControllerService};
pub use self::supervisor::{ConnectionState, ConnectionSupervisor, RebuildOutcome, Visibility};
pub use self::ui_client::{UiClient, UiEvent};
