//! AgentWatch - heartbeat on the controller -> agent link.
//!
//! The agent context can die without saying goodbye. A `ConnectionSupervisor`
//! pings it on the visible tier interval; once it stops answering the
//! controller is told the agent closed, and told it is ready again when a
//! later rebuild gets an answer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::app::service::ControllerHandle;
use crate::app::supervisor::{ConnectionSupervisor, Visibility};
use crate::config::ConnectionSettings;
use crate::domain::{AgentMessage, TransportError};
use crate::ports::{AgentPort, Clock, SupervisedLink};

/// The agent link as seen by its supervisor.
///
/// There is no listener to re-register on this link, so `reattach` marks the
/// agent unavailable and `resync` marks it available again.
struct AgentLiveness {
    agent: Arc<dyn AgentPort>,
    controller: ControllerHandle,
}

#[async_trait]
impl SupervisedLink for AgentLiveness {
    async fn ping(&self) -> Result<(), TransportError> {
        self.agent.ping().await
    }

    async fn reattach(&self) -> Result<(), TransportError> {
        warn!("agent stopped answering; treating it as closed");
        self.controller
            .deliver(AgentMessage::Closed)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn resync(&self) -> Result<(), TransportError> {
        info!("agent answers again");
        self.controller
            .deliver(AgentMessage::AgentReady { page_url: None })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

pub struct AgentWatch {
    supervisor: Arc<ConnectionSupervisor>,
}

impl AgentWatch {
    pub fn new(
        agent: Arc<dyn AgentPort>,
        controller: ControllerHandle,
        settings: ConnectionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let link = Arc::new(AgentLiveness { agent, controller });
        Self {
            supervisor: ConnectionSupervisor::new("agent", link, settings, clock),
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub async fn start(&self) {
        self.supervisor.schedule_polling(Visibility::Visible).await;
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
