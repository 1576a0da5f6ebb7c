//! ControllerService - runs the `TaskQueueManager` on its own task.
//!
//! Everything that touches run state goes through one inbox, so UI
//! commands, agent events and elapsed delays are applied strictly one after
//! another.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app::controller::{ControllerPorts, DelayTicket, TaskQueueManager};
use crate::domain::{
    AgentMessage, ControllerError, ControllerReply, StateUpdate, TransportError, UiCommand,
};
use crate::impls::BroadcastStateSink;
use crate::ports::{AgentPort, AgentReporter, Clock, IdGenerator, Subscription};

const INBOX_CAPACITY: usize = 256;
const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum ControllerInput {
    Command {
        command: UiCommand,
        reply: oneshot::Sender<ControllerReply>,
    },
    Ping {
        reply: oneshot::Sender<()>,
    },
    Agent(AgentMessage),
}

/// Cloneable handle to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    inbox: mpsc::Sender<ControllerInput>,
    updates: broadcast::Sender<StateUpdate>,
}

impl ControllerHandle {
    pub async fn request(&self, command: UiCommand) -> Result<ControllerReply, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(ControllerInput::Command { command, reply })
            .await
            .map_err(|_| ControllerError::ServiceClosed)?;
        rx.await.map_err(|_| ControllerError::ServiceClosed)
    }

    pub async fn ping(&self) -> Result<(), ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(ControllerInput::Ping { reply })
            .await
            .map_err(|_| ControllerError::ServiceClosed)?;
        rx.await.map_err(|_| ControllerError::ServiceClosed)
    }

    pub async fn deliver(&self, message: AgentMessage) -> Result<(), ControllerError> {
        self.inbox
            .send(ControllerInput::Agent(message))
            .await
            .map_err(|_| ControllerError::ServiceClosed)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.updates.subscribe())
    }
}

#[async_trait]
impl AgentReporter for ControllerHandle {
    async fn report(&self, message: AgentMessage) -> Result<(), TransportError> {
        self.deliver(message)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Controller task handle.
/// - `request_shutdown` stops the loop after the input in hand
/// - `shutdown_and_join` also waits for it
pub struct ControllerService {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    handle: ControllerHandle,
}

impl ControllerService {
    pub fn spawn(
        agent: Arc<dyn AgentPort>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        inter_task_delay: Duration,
    ) -> Self {
        let (updates, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (inbox, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ports = ControllerPorts {
            agent,
            sink: Arc::new(BroadcastStateSink::new(updates.clone())),
            clock,
            ids,
        };
        let (manager, wakeups) = TaskQueueManager::new(ports, inter_task_delay);

        let join = tokio::spawn(controller_loop(manager, inbox_rx, wakeups, shutdown_rx));
        info!(
            delay_ms = inter_task_delay.as_millis() as u64,
            "controller started"
        );

        Self {
            shutdown_tx,
            join,
            handle: ControllerHandle { inbox, updates },
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn controller_loop(
    mut manager: TaskQueueManager,
    mut inbox: mpsc::Receiver<ControllerInput>,
    mut wakeups: mpsc::UnboundedReceiver<DelayTicket>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(ticket) = wakeups.recv() => manager.on_delay_elapsed(ticket).await,
            input = inbox.recv() => match input {
                Some(input) => handle_input(&mut manager, input).await,
                None => break,
            },
        }
    }
    info!("controller stopped");
}

async fn handle_input(manager: &mut TaskQueueManager, input: ControllerInput) {
    match input {
        ControllerInput::Command { command, reply } => {
            debug!(command = command.name(), "ui command");
            let answer = apply_command(manager, command).await;
            // the requester may have timed out
            let _ = reply.send(answer);
        }
        ControllerInput::Ping { reply } => {
            let _ = reply.send(());
        }
        ControllerInput::Agent(message) => match message {
            AgentMessage::AgentReady { page_url } => manager.on_agent_ready(page_url.as_deref()),
            AgentMessage::Event(event) => manager.on_agent_event(event).await,
            AgentMessage::Closed => manager.on_agent_closed(),
        },
    }
}

async fn apply_command(manager: &mut TaskQueueManager, command: UiCommand) -> ControllerReply {
    match command {
        UiCommand::StartBatch(spec) => match manager.start_batch(spec).await {
            Ok(count) => ControllerReply::ok(format!("{count} tasks added to queue.")),
            Err(err) => ControllerReply::rejected(err.to_string()),
        },
        UiCommand::Stop => {
            let cleared = manager.stop().await;
            ControllerReply::ok(format!("Queue cleared of {cleared} tasks."))
        }
        UiCommand::GetState => ControllerReply::State(StateUpdate {
            state: manager.snapshot(),
            revision: manager.revision(),
            pending_notification: None,
        }),
        UiCommand::SetDelay { seconds } => {
            manager.set_delay(seconds);
            ControllerReply::ok(format!("Task delay set to {seconds}s."))
        }
    }
}
