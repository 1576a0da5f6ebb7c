//! In-process links between the three contexts.
//!
//! - `InProcessControllerLink`: UI side -> controller over a `ControllerHandle`
//! - `ChannelAgentLink`: controller -> agent over an mpsc channel
//!
//! Both can be cut with `disconnect()`, which is how the binary and the
//! tests stand in for a dropped browser port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::app::{AgentRequest, ControllerHandle};
use crate::domain::{AgentCommand, ControllerError, ControllerReply, TransportError, UiCommand};
use crate::ports::{AgentPort, ControllerLink, Subscription};

pub struct InProcessControllerLink {
    handle: ControllerHandle,
    timeout: Duration,
    connected: AtomicBool,
}

impl InProcessControllerLink {
    pub fn new(handle: ControllerHandle, timeout: Duration) -> Self {
        Self {
            handle,
            timeout,
            connected: AtomicBool::new(true),
        }
    }

    pub fn disconnect(&self) {
        debug!("controller link cut");
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        debug!("controller link restored");
        self.connected.store(true, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

fn closed(_: ControllerError) -> TransportError {
    TransportError::Closed
}

#[async_trait]
impl ControllerLink for InProcessControllerLink {
    async fn request(&self, command: UiCommand) -> Result<ControllerReply, TransportError> {
        self.ensure_connected()?;
        tokio::time::timeout(self.timeout, self.handle.request(command))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(closed)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.ensure_connected()?;
        tokio::time::timeout(self.timeout, self.handle.ping())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(closed)
    }

    fn subscribe(&self) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;
        Ok(self.handle.subscribe())
    }
}

pub struct ChannelAgentLink {
    outbox: mpsc::Sender<AgentRequest>,
    ping_timeout: Duration,
    connected: AtomicBool,
}

impl ChannelAgentLink {
    pub fn new(outbox: mpsc::Sender<AgentRequest>, ping_timeout: Duration) -> Self {
        Self {
            outbox,
            ping_timeout,
            connected: AtomicBool::new(true),
        }
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentPort for ChannelAgentLink {
    async fn send(&self, command: AgentCommand) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbox
            .send(AgentRequest::command(command))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let (request, pong) = AgentRequest::ping();
        self.outbox
            .send(request)
            .await
            .map_err(|_| TransportError::Closed)?;
        tokio::time::timeout(self.ping_timeout, pong)
            .await
            .map_err(|_| TransportError::Timeout(self.ping_timeout))?
            .map_err(|_| TransportError::Closed)
    }
}
