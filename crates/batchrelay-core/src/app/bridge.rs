//! MessageBridge - relays between the UI and the controller.
//!
//! Stateless apart from the listener registration: broadcasts are forwarded
//! verbatim, commands are retried through the supervisor and only surfaced
//! to the UI as a `CommunicationError` once retries are exhausted.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::supervisor::{ConnectionSupervisor, RebuildOutcome, Visibility};
use crate::config::ConnectionSettings;
use crate::domain::{
    BridgeError, ControllerReply, CorrelationId, StateUpdate, TransportError, UiCommand,
    UiInbound,
};
use crate::ports::{Clock, ControllerLink, SupervisedLink};
use crate::queue::RetryPolicy;

/// The bridge's side of the controller link, as seen by its supervisor.
struct BridgeLink {
    controller: Arc<dyn ControllerLink>,
    ui: mpsc::UnboundedSender<UiInbound>,
    /// Task draining the current broadcast subscription.
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeLink {
    async fn detach(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
    }
}

fn forward(ui: &mpsc::UnboundedSender<UiInbound>, message: UiInbound) -> bool {
    ui.send(message).is_ok()
}

#[async_trait]
impl SupervisedLink for BridgeLink {
    async fn ping(&self) -> Result<(), TransportError> {
        self.controller.ping().await
    }

    async fn reattach(&self) -> Result<(), TransportError> {
        let mut slot = self.listener.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let mut subscription = self.controller.subscribe()?;
        let ui = self.ui.clone();
        *slot = Some(tokio::spawn(async move {
            while let Some(update) = subscription.recv().await {
                if !forward(&ui, UiInbound::State { update, resync: false }) {
                    break;
                }
            }
            debug!("broadcast listener ended");
        }));
        debug!("broadcast listener attached");
        Ok(())
    }

    async fn resync(&self) -> Result<(), TransportError> {
        match self.controller.request(UiCommand::GetState).await? {
            ControllerReply::State(update) => {
                if forward(&self.ui, UiInbound::State { update, resync: true }) {
                    info!("state resynced");
                    Ok(())
                } else {
                    Err(TransportError::Closed)
                }
            }
            other => Err(TransportError::Rejected(format!(
                "unexpected reply to GET_STATE: {other:?}"
            ))),
        }
    }
}

pub struct MessageBridge {
    link: Arc<BridgeLink>,
    supervisor: Arc<ConnectionSupervisor>,
    relay_policy: RetryPolicy,
}

impl MessageBridge {
    pub fn new(
        controller: Arc<dyn ControllerLink>,
        ui: mpsc::UnboundedSender<UiInbound>,
        settings: ConnectionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let relay_policy = settings.retry_policy();
        let link = Arc::new(BridgeLink {
            controller,
            ui,
            listener: Mutex::new(None),
        });
        let supervisor = ConnectionSupervisor::new("controller", link.clone(), settings, clock);
        Self {
            link,
            supervisor,
            relay_policy,
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Attach the broadcast listener and start the heartbeat.
    pub async fn start(&self) {
        if let Err(err) = self.link.reattach().await {
            warn!(error = %err, "initial attach failed");
            self.supervisor.on_transport_error().await;
        }
        self.supervisor.schedule_polling(Visibility::Visible).await;
        info!("bridge started");
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        self.link.detach().await;
        info!("bridge shut down");
    }

    /// Deliver a UI command, retrying through the supervisor.
    pub async fn relay_to_controller(
        &self,
        command: UiCommand,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), BridgeError> {
        let mut attempts = 0;
        loop {
            match self.link.controller.request(command.clone()).await {
                Ok(reply) => {
                    self.supervisor.record_success().await;
                    if let Some(correlation_id) = correlation_id {
                        self.relay_to_ui(UiInbound::Response {
                            correlation_id,
                            reply,
                        });
                    }
                    return Ok(());
                }
                Err(err) => {
                    attempts += 1;
                    if !self.relay_policy.allows(attempts) {
                        warn!(command = command.name(), attempts, error = %err, "relay gave up");
                        let reason = err.to_string();
                        self.relay_to_ui(UiInbound::CommunicationError {
                            reason: reason.clone(),
                            original: command,
                            correlation_id,
                        });
                        return Err(BridgeError::Exhausted { attempts, reason });
                    }

                    let delay = self.relay_policy.next_delay(attempts);
                    warn!(command = command.name(), attempts, error = %err, delay_ms = delay.as_millis() as u64, "relay failed; retrying");
                    tokio::time::sleep(delay).await;
                    if self.supervisor.rebuild().await == RebuildOutcome::Suppressed {
                        debug!("rebuild suppressed; retrying on the current link");
                    }
                }
            }
        }
    }

    /// One-way forward to the UI.
    pub fn relay_to_ui(&self, message: UiInbound) {
        if !forward(&self.link.ui, message) {
            debug!("ui detached; message dropped");
        }
    }

    pub fn on_controller_broadcast(&self, update: StateUpdate) {
        self.relay_to_ui(UiInbound::State {
            update,
            resync: false,
        });
    }

    pub async fn on_visibility_change(&self, visibility: Visibility) {
        self.supervisor.on_visibility_change(visibility).await;
    }

    pub async fn on_network_online(&self) {
        self.supervisor.on_network_online().await;
    }
}
