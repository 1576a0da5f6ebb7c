//! Ports - the seams between the core and everything it talks to.
//!
//! Each trait hides one external collaborator: the agent link, the
//! controller link, broadcast delivery, settings and history persistence,
//! time and id generation. `impls` holds in-process implementations.

pub mod agent;
pub mod clock;
pub mod history_store;
pub mod id_generator;
pub mod link;
pub mod settings_store;
pub mod state_sink;

pub use self::agent::{AgentPort, AgentReporter, PageAutomation};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::history_store::{
    HISTORY_LIMIT, HistoryEntry, HistoryEntryKind, HistorySession, HistoryStore,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::link::{ControllerLink, Subscription, SupervisedLink};
pub use self::settings_store::SettingsStore;
pub use self::state_sink::StateSink;
