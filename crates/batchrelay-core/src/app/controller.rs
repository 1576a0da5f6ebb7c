//! TaskQueueManager - the controller's run state machine.
//!
//! The manager is owned by exactly one event loop (`ControllerService`), so
//! it keeps `RunState` in plain fields without locking. The only concurrent
//! piece is the inter-task delay: a spawned sleep that posts a
//! `DelayTicket` back to the loop. At most one delay is live at a time and
//! every ticket is re-validated when it arrives, so a `stop()` that races
//! the timer always wins.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{
    AgentCommand, AgentEvent, BatchSpec, ControllerError, Notification, NotificationKind,
    RunPhase, RunState, StateUpdate, StatusChange, TaskId,
};
use crate::observability::StatusCounts;
use crate::ports::{AgentPort, Clock, IdGenerator, StateSink};
use crate::queue::{Task, TaskQueue, TaskStatus, progress_percent};

/// Error text recorded on the active task when the agent context vanishes.
pub const COUNTERPART_CLOSED: &str = "counterpart closed";

/// Identifies one scheduled inter-task delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelayTicket(u64);

struct PendingDelay {
    ticket: DelayTicket,
    candidate: TaskId,
    handle: JoinHandle<()>,
}

/// Whether the inter-task delay still has to be applied on this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayGate {
    Apply,
    Served,
}

/// External collaborators of the manager.
#[derive(Clone)]
pub struct ControllerPorts {
    pub agent: Arc<dyn AgentPort>,
    pub sink: Arc<dyn StateSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

pub struct TaskQueueManager {
    phase: RunPhase,
    queue: TaskQueue,
    active: Option<TaskId>,
    inter_task_delay: Duration,
    agent_available: bool,
    pending_notification: Option<Notification>,
    revision: u64,
    pending_delay: Option<PendingDelay>,
    next_ticket: u64,
    wakeups: mpsc::UnboundedSender<DelayTicket>,
    ports: ControllerPorts,
}

impl TaskQueueManager {
    /// Create a manager. Elapsed delays arrive on the returned receiver and
    /// must be fed back through [`TaskQueueManager::on_delay_elapsed`].
    pub fn new(
        ports: ControllerPorts,
        inter_task_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<DelayTicket>) {
        let (wakeups, wakeup_rx) = mpsc::unbounded_channel();
        let manager = Self {
            phase: RunPhase::Idle,
            queue: TaskQueue::new(),
            active: None,
            inter_task_delay,
            agent_available: false,
            pending_notification: None,
            revision: 0,
            pending_delay: None,
            next_ticket: 0,
            wakeups,
            ports,
        };
        (manager, wakeup_rx)
    }

    // ----------------------------------------------------------------
    // Commands
    // ----------------------------------------------------------------

    /// Replace the queue with a new batch and start working on it.
    ///
    /// Rejected unless the controller is idle; the existing queue is left
    /// untouched in that case.
    pub async fn start_batch(&mut self, spec: BatchSpec) -> Result<usize, ControllerError> {
        if self.phase != RunPhase::Idle {
            warn!(phase = ?self.phase, "start_batch rejected");
            return Err(ControllerError::AlreadyRunning);
        }

        let now = self.ports.clock.now();
        let tasks: Vec<Task> = spec
            .prompts
            .into_iter()
            .enumerate()
            .map(|(i, prompt)| {
                Task::new(
                    self.ports.ids.generate_task_id(),
                    i as u32 + 1,
                    prompt,
                    spec.aspect_ratio,
                    spec.quantity,
                    now,
                )
            })
            .collect();
        let count = tasks.len();

        self.cancel_delay();
        self.queue.replace(tasks);
        self.active = None;
        self.phase = RunPhase::Running;
        info!(
            tasks = count,
            delay_ms = self.inter_task_delay.as_millis() as u64,
            "batch started"
        );
        self.announce(NotificationKind::BatchStarted, None);

        self.advance().await;
        Ok(count)
    }

    /// Abandon the batch. Returns how many tasks were dropped.
    pub async fn stop(&mut self) -> usize {
        self.cancel_delay();
        let cleared = self.queue.clear();
        self.active = None;
        self.phase = RunPhase::Idle;
        info!(cleared, "batch stopped");
        self.announce(NotificationKind::BatchStopped, None);
        self.clear_agent_context().await;
        cleared
    }

    /// Change the delay used by delays scheduled from now on.
    pub fn set_delay(&mut self, seconds: u64) {
        self.inter_task_delay = Duration::from_secs(seconds);
        info!(seconds, "inter-task delay updated");
    }

    // ----------------------------------------------------------------
    // Agent side
    // ----------------------------------------------------------------

    pub fn on_agent_ready(&mut self, page_url: Option<&str>) {
        self.agent_available = true;
        info!(page_url = page_url.unwrap_or("-"), "agent ready");
    }

    /// The agent's context is gone. A running batch halts; the active task
    /// is failed because its real outcome can no longer be observed.
    pub fn on_agent_closed(&mut self) {
        self.agent_available = false;
        self.cancel_delay();

        if self.phase != RunPhase::Running {
            debug!("agent closed while idle");
            return;
        }

        let now = self.ports.clock.now();
        if let Some(task) = self.active.and_then(|id| self.queue.get_mut(id))
            && task.status.is_active()
        {
            task.mark_failed(COUNTERPART_CLOSED, now);
            warn!(task_id = %task.id, "active task failed: agent closed");
        }
        self.phase = RunPhase::Idle;
        self.announce(NotificationKind::BatchStopped, None);
    }

    pub async fn on_agent_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Submitted {
                task_id,
                external_id,
                at,
            } => {
                let Some(task) = self.queue.get_mut(task_id) else {
                    debug!(%task_id, "submission for unknown task dropped");
                    return;
                };
                if task.status != TaskStatus::Submitting {
                    debug!(%task_id, status = %task.status, "submission ignored");
                    return;
                }
                task.mark_submitted(&external_id, at);
                info!(%task_id, %external_id, "task submitted");
                self.announce(NotificationKind::TaskUpdated, Some(task_id));
            }
            AgentEvent::StatusChanged(change) => self.apply_status_change(change).await,
            AgentEvent::InteractionFailed { task_id, error } => {
                let now = self.ports.clock.now();
                let Some(task) = self.queue.get_mut(task_id) else {
                    debug!(%task_id, "interaction failure for unknown task dropped");
                    return;
                };
                if !task.status.is_active() {
                    debug!(%task_id, status = %task.status, "interaction failure for inactive task ignored");
                    return;
                }
                error!(%task_id, %error, "page interaction failed");
                task.mark_failed(format!("Page interaction failed: {error}"), now);
                self.finish_task(task_id).await;
            }
        }
    }

    async fn apply_status_change(&mut self, change: StatusChange) {
        let target = match (change.task_id, change.external_id.as_deref()) {
            (Some(id), _) => self.queue.get(id).map(|t| t.id),
            (None, Some(external_id)) => self.queue.find_by_external_id(external_id),
            (None, None) => None,
        };
        let Some(task_id) = target else {
            debug!(
                external_id = change.external_id.as_deref().unwrap_or("-"),
                status = %change.status,
                "status change for unknown task dropped"
            );
            return;
        };

        let now = self.ports.clock.now();
        let Some(task) = self.queue.get_mut(task_id) else {
            return;
        };
        if !task.status.is_active() {
            debug!(%task_id, status = %task.status, "status change for inactive task dropped");
            return;
        }
        if !task.status.can_transition_to(change.status) {
            debug!(%task_id, from = %task.status, to = %change.status, "backwards status change dropped");
            return;
        }
        if let Some(external_id) = change.external_id.as_deref()
            && !task.assign_external_id(external_id)
        {
            warn!(%task_id, %external_id, "conflicting external id ignored");
        }

        task.apply_status(change.status, change.progress.map(progress_percent), now);
        if let Some(result_ref) = change.result_ref {
            task.result_ref = Some(result_ref);
        }
        if let Some(error) = change.error {
            task.error = Some(error);
        }
        debug!(%task_id, status = %task.status, progress = ?task.progress, "task status updated");

        if change.status.is_terminal() {
            info!(%task_id, status = %change.status, "task concluded");
            self.finish_task(task_id).await;
        } else {
            self.announce(NotificationKind::TaskUpdated, Some(task_id));
        }
    }

    async fn finish_task(&mut self, task_id: TaskId) {
        self.announce(NotificationKind::TaskFinished, Some(task_id));
        self.advance().await;
    }

    // ----------------------------------------------------------------
    // Dispatch
    // ----------------------------------------------------------------

    /// Resume advancement after an inter-task delay.
    ///
    /// Tickets that no longer match the live delay (cancelled by `stop()`,
    /// replaced by a new batch) are ignored.
    pub async fn on_delay_elapsed(&mut self, ticket: DelayTicket) {
        let Some(delay) = self.pending_delay.take_if(|d| d.ticket == ticket) else {
            debug!(?ticket, "stale delay ticket ignored");
            return;
        };

        if self.phase != RunPhase::Running {
            debug!("phase changed during delay; not dispatching");
            return;
        }
        if self.queue.is_empty() {
            debug!("queue cleared during delay");
            self.phase = RunPhase::Idle;
            self.broadcast();
            return;
        }
        if !self.agent_available {
            self.halt();
            return;
        }

        if self.queue.is_pending(delay.candidate) {
            self.dispatch(delay.candidate).await;
        } else {
            debug!(task_id = %delay.candidate, "delayed task no longer pending; re-scanning");
            self.advance_from(DelayGate::Served).await;
        }
    }

    async fn advance(&mut self) {
        self.advance_from(DelayGate::Apply).await;
    }

    async fn advance_from(&mut self, gate: DelayGate) {
        if self.phase != RunPhase::Running {
            return;
        }
        if self.pending_delay.is_some() {
            debug!("delay already pending");
            return;
        }
        if self.queue.active_count() > 0 {
            debug!("a task is still with the agent");
            return;
        }

        let Some(candidate) = self.queue.next_pending() else {
            self.finish_batch().await;
            return;
        };

        if gate == DelayGate::Apply
            && self.previous_task_finished()
            && !self.inter_task_delay.is_zero()
        {
            self.schedule_delay(candidate);
            return;
        }

        if !self.agent_available {
            self.halt();
            return;
        }
        self.dispatch(candidate).await;
    }

    async fn dispatch(&mut self, task_id: TaskId) {
        let now = self.ports.clock.now();
        let Some(task) = self.queue.get_mut(task_id) else {
            return;
        };
        task.mark_submitting(now);
        let task = task.clone();
        self.active = Some(task_id);
        info!(%task_id, index = task.original_index, "dispatching task");
        self.announce(NotificationKind::TaskStarted, Some(task_id));

        if let Err(err) = self
            .ports
            .agent
            .send(AgentCommand::ExecuteTask { task })
            .await
        {
            warn!(%task_id, error = %err, "agent unreachable during dispatch");
            self.on_agent_closed();
        }
    }

    async fn finish_batch(&mut self) {
        let completed = self.queue.all_terminal();
        self.phase = RunPhase::Idle;
        self.active = None;
        if completed {
            let counts = self.queue.counts_by_status();
            info!(
                succeeded = counts.succeeded,
                failed = counts.failed,
                "batch completed"
            );
            self.announce(NotificationKind::BatchCompleted, None);
            self.clear_agent_context().await;
        } else {
            self.broadcast();
        }
    }

    /// Stop advancing without touching task statuses.
    fn halt(&mut self) {
        warn!("agent link unavailable; halting run");
        self.phase = RunPhase::Idle;
        self.broadcast();
    }

    fn previous_task_finished(&self) -> bool {
        self.active
            .and_then(|id| self.queue.get(id))
            .is_some_and(|t| t.status.is_terminal())
    }

    fn schedule_delay(&mut self, candidate: TaskId) {
        self.next_ticket += 1;
        let ticket = DelayTicket(self.next_ticket);
        let delay = self.inter_task_delay;
        let wakeups = self.wakeups.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wakeups.send(ticket);
        });
        info!(delay_ms = delay.as_millis() as u64, task_id = %candidate, "delaying next task");
        self.pending_delay = Some(PendingDelay {
            ticket,
            candidate,
            handle,
        });
    }

    fn cancel_delay(&mut self) {
        if let Some(delay) = self.pending_delay.take() {
            delay.handle.abort();
            debug!(ticket = ?delay.ticket, "pending delay cancelled");
        }
    }

    async fn clear_agent_context(&self) {
        if !self.agent_available {
            return;
        }
        if let Err(err) = self.ports.agent.send(AgentCommand::ClearContext).await {
            warn!(error = %err, "could not clear agent context");
        }
    }

    // ----------------------------------------------------------------
    // Broadcasting
    // ----------------------------------------------------------------

    /// Set the pending notification and broadcast it with the state.
    fn announce(&mut self, kind: NotificationKind, subject: Option<TaskId>) {
        self.pending_notification = Some(Notification {
            kind,
            subject,
            id: self.ports.ids.generate_notification_id(),
        });
        self.broadcast();
    }

    /// Publish the current state. The pending notification goes out at most
    /// once: it is cleared right after this broadcast.
    fn broadcast(&mut self) {
        self.revision += 1;
        let update = StateUpdate {
            state: self.snapshot(),
            revision: self.revision,
            pending_notification: self.pending_notification.take(),
        };
        self.ports.sink.publish(update);
    }

    // ----------------------------------------------------------------
    // Reads
    // ----------------------------------------------------------------

    pub fn snapshot(&self) -> RunState {
        RunState {
            phase: self.phase,
            queue: self.queue.tasks().to_vec(),
            active: self.active.and_then(|id| self.queue.get(id)).cloned(),
            inter_task_delay_ms: self.inter_task_delay.as_millis() as u64,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Revision of the most recent broadcast.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn counts(&self) -> StatusCounts {
        self.queue.counts_by_status()
    }

    pub fn has_pending_delay(&self) -> bool {
        self.pending_delay.is_some()
    }

    pub fn is_agent_available(&self) -> bool {
        self.agent_available
    }
}

impl Drop for TaskQueueManager {
    fn drop(&mut self) {
        self.cancel_delay();
    }
}
