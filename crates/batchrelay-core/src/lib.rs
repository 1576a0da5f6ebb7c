//! batchrelay-core
//!
//! Orchestration core for batch image generation driven through a web page.
//!
//! # Modules
//! - **domain**: ids, batch input, run state, events, messages, errors
//! - **queue**: task status machine, task records, the ordered queue, retry policy
//! - **ports**: seams to the agent, the controller link, persistence, time and ids
//! - **app**: controller, agent host, bridge, supervisor, UI client
//! - **impls**: in-process implementations of the ports
//! - **config**: TOML settings
//! - **observability**: status counts

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
