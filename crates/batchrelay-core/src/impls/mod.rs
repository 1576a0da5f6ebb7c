//! Impls - in-process implementations of the ports.
//!
//! # Included
//! - **BroadcastStateSink**: controller broadcasts over `tokio::sync::broadcast`
//! - **InProcessControllerLink / ChannelAgentLink**: channel-backed links
//! - **InMemorySettingsStore / FileSettingsStore**: settings persistence
//! - **InMemoryHistoryStore**: session history log

pub mod broadcast_sink;
pub mod channel_link;
pub mod history;
pub mod settings;

pub use self::broadcast_sink::BroadcastStateSink;
pub use self::channel_link::{ChannelAgentLink, InProcessControllerLink};
pub use self::history::InMemoryHistoryStore;
pub use self::settings::{FileSettingsStore, InMemorySettingsStore};
