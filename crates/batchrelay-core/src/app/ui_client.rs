//! UiClient - the consumer end of the bridge.
//!
//! Keeps the latest state, turns notifications into exactly one effect per
//! id, pairs responses with the requests that asked for them, and keeps the
//! session's history log.
//!
//! States older than the one applied last are dropped, so broadcasts that
//! predate a resync cannot undo it. Outstanding requests survive a resync:
//! the bridge keeps relaying them and their responses arrive afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{
    ConfigError, ControllerReply, CorrelationId, Notification, NotificationId, NotificationKind,
    SessionId, StateUpdate, UiInbound,
};
use crate::ports::{
    Clock, HISTORY_LIMIT, HistoryEntry, HistoryEntryKind, HistoryStore, IdGenerator,
};
use crate::queue::{Task, TaskStatus};

/// Observable effect of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A notification seen for the first time.
    Notified {
        notification: Notification,
        line: String,
    },
    /// A post-reconnect snapshot replaced the local view.
    Resynced,
    Replied {
        correlation_id: CorrelationId,
        reply: ControllerReply,
    },
    DeliveryFailed {
        command: &'static str,
        reason: String,
        correlation_id: Option<CorrelationId>,
    },
}

struct HistoryLog {
    store: Arc<dyn HistoryStore>,
    session: SessionId,
    entries: Vec<HistoryEntry>,
}

pub struct UiClient {
    latest: Option<StateUpdate>,
    seen: HashSet<NotificationId>,
    awaiting: HashSet<CorrelationId>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    history: Option<HistoryLog>,
}

impl UiClient {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            latest: None,
            seen: HashSet::new(),
            awaiting: HashSet::new(),
            ids,
            clock,
            history: None,
        }
    }

    /// Attach a history store, continuing its current session or starting
    /// a new one.
    pub async fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Result<Self, ConfigError> {
        let session = match store.current_session().await? {
            Some(id) => id,
            None => store.create_session().await?,
        };
        let entries = store
            .load(session)
            .await?
            .map(|s| s.entries)
            .unwrap_or_default();
        info!(%session, entries = entries.len(), "history session opened");
        self.history = Some(HistoryLog {
            store,
            session,
            entries,
        });
        Ok(self)
    }

    /// Allocate a correlation id for a command about to be relayed.
    pub fn begin_request(&mut self) -> CorrelationId {
        let id = self.ids.generate_correlation_id();
        self.awaiting.insert(id);
        id
    }

    pub fn apply(&mut self, inbound: UiInbound) -> Vec<UiEvent> {
        let mut events = Vec::new();
        match inbound {
            UiInbound::State { update, resync } => {
                // a resync outranks broadcasts that were still in flight
                if let Some(latest) = &self.latest
                    && update.revision < latest.revision
                {
                    debug!(
                        revision = update.revision,
                        latest = latest.revision,
                        resync,
                        "state older than the applied snapshot dropped"
                    );
                    return events;
                }
                let notification = update.pending_notification;
                self.latest = Some(update);
                if resync {
                    debug!("authoritative snapshot applied");
                    events.push(UiEvent::Resynced);
                }
                if let Some(notification) = notification
                    && self.seen.insert(notification.id)
                {
                    let line = self.note(notification);
                    events.push(UiEvent::Notified { notification, line });
                }
            }
            UiInbound::Response {
                correlation_id,
                reply,
            } => {
                if self.awaiting.remove(&correlation_id) {
                    events.push(UiEvent::Replied {
                        correlation_id,
                        reply,
                    });
                } else {
                    debug!(%correlation_id, "response without a matching request dropped");
                }
            }
            UiInbound::CommunicationError {
                reason,
                original,
                correlation_id,
            } => {
                if let Some(id) = correlation_id {
                    self.awaiting.remove(&id);
                }
                warn!(command = original.name(), %reason, "command not delivered");
                self.push_entry(HistoryEntry::new(
                    HistoryEntryKind::System,
                    format!("Could not deliver {}: {reason}", original.name()),
                    self.clock.now(),
                ));
                events.push(UiEvent::DeliveryFailed {
                    command: original.name(),
                    reason,
                    correlation_id,
                });
            }
        }
        events
    }

    /// Log something the operator did.
    pub fn record_user_action(&mut self, text: impl Into<String>) {
        let entry = HistoryEntry::new(HistoryEntryKind::User, text, self.clock.now());
        self.push_entry(entry);
    }

    pub async fn persist_history(&self) -> Result<(), ConfigError> {
        let Some(log) = &self.history else {
            return Ok(());
        };
        log.store.save(log.session, log.entries.clone()).await
    }

    pub fn latest(&self) -> Option<&StateUpdate> {
        self.latest.as_ref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        self.history
            .as_ref()
            .map(|log| log.entries.as_slice())
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.history.as_ref().map(|log| log.session)
    }

    pub fn pending_requests(&self) -> usize {
        self.awaiting.len()
    }

    fn subject(&self, notification: &Notification) -> Option<&Task> {
        let id = notification.subject?;
        self.latest
            .as_ref()?
            .state
            .queue
            .iter()
            .find(|t| t.id == id)
    }

    /// Record a notification in the history and return its text.
    fn note(&mut self, notification: Notification) -> String {
        let now = self.clock.now();
        let task = self.subject(&notification);
        let (kind, line) = match (notification.kind, task) {
            (NotificationKind::BatchStarted, _) => {
                let total = self.latest.as_ref().map_or(0, |u| u.state.queue.len());
                (HistoryEntryKind::System, format!("Batch started: {total} tasks"))
            }
            (NotificationKind::TaskStarted, Some(task)) => (
                HistoryEntryKind::TaskStatus,
                format!("Task #{} started: {}", task.original_index, task.prompt),
            ),
            (NotificationKind::TaskUpdated, Some(task)) => {
                let line = match task.progress {
                    Some(p) => format!("Task #{}: {} ({p}%)", task.original_index, task.status),
                    None => format!("Task #{}: {}", task.original_index, task.status),
                };
                (HistoryEntryKind::TaskStatus, line)
            }
            (NotificationKind::TaskFinished, Some(task)) => {
                let line = match (task.status, task.error.as_deref()) {
                    (TaskStatus::Failed, Some(error)) => {
                        format!("Task #{} failed: {error}", task.original_index)
                    }
                    (status, _) => format!("Task #{} {}", task.original_index, status),
                };
                (HistoryEntryKind::TaskStatus, line)
            }
            (NotificationKind::BatchCompleted, _) => {
                let (succeeded, failed) = self.latest.as_ref().map_or((0, 0), |u| {
                    let queue = &u.state.queue;
                    (
                        queue.iter().filter(|t| t.status == TaskStatus::Succeeded).count(),
                        queue.iter().filter(|t| t.status == TaskStatus::Failed).count(),
                    )
                });
                (
                    HistoryEntryKind::Summary,
                    format!("Batch completed: {succeeded} succeeded, {failed} failed"),
                )
            }
            (NotificationKind::BatchStopped, _) => {
                (HistoryEntryKind::System, "Batch stopped".to_string())
            }
            (kind, None) => (HistoryEntryKind::System, format!("{kind:?}")),
        };

        let mut entry = HistoryEntry::new(kind, line.clone(), now);
        if let Some(task) = task {
            entry.task_id = Some(task.id);
            entry.status = Some(task.status);
            entry.progress = task.progress;
        }
        self.push_entry(entry);
        line
    }

    fn push_entry(&mut self, entry: HistoryEntry) {
        let Some(log) = self.history.as_mut() else {
            return;
        };
        log.entries.push(entry);
        if log.entries.len() > HISTORY_LIMIT {
            let excess = log.entries.len() - HISTORY_LIMIT;
            log.entries.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AspectRatio, RunPhase, TaskId, UiCommand};
    use crate::impls::InMemoryHistoryStore;
    use crate::ports::{SystemClock, UlidGenerator};
    use chrono::Utc;

    fn client() -> UiClient {
        UiClient::new(
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    fn store() -> Arc<InMemoryHistoryStore> {
        Arc::new(InMemoryHistoryStore::new(
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        ))
    }

    fn update_with(kind: NotificationKind, task: Option<&Task>) -> StateUpdate {
        let mut update = StateUpdate::default();
        update.state.phase = RunPhase::Running;
        if let Some(task) = task {
            update.state.queue.push(task.clone());
        }
        update.pending_notification = Some(Notification {
            kind,
            subject: task.map(|t| t.id),
            id: NotificationId::generate(),
        });
        update
    }

    fn task() -> Task {
        Task::new(
            TaskId::generate(),
            1,
            "red fox in snow",
            AspectRatio::Square,
            1,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn duplicate_notification_has_one_effect() {
        let mut ui = client().with_history(store()).await.unwrap();
        let task = task();
        let update = update_with(NotificationKind::TaskStarted, Some(&task));

        let first = ui.apply(UiInbound::State {
            update: update.clone(),
            resync: false,
        });
        let second = ui.apply(UiInbound::State {
            update,
            resync: false,
        });

        assert!(matches!(
            &first[..],
            [UiEvent::Notified { line, .. }] if line == "Task #1 started: red fox in snow"
        ));
        assert!(second.is_empty());
        assert_eq!(ui.history().len(), 1);
        assert_eq!(ui.history()[0].task_id, Some(task.id));
    }

    #[test]
    fn resync_replaces_state() {
        let mut ui = client();
        let mut snapshot = StateUpdate::default();
        snapshot.state.inter_task_delay_ms = 9_000;

        let events = ui.apply(UiInbound::State {
            update: snapshot.clone(),
            resync: true,
        });
        assert_eq!(events, vec![UiEvent::Resynced]);
        assert_eq!(ui.latest(), Some(&snapshot));
    }

    #[test]
    fn broadcasts_predating_a_resync_are_discarded() {
        let mut ui = client();
        let task = task();
        let request = ui.begin_request();

        let mut snapshot = StateUpdate::default();
        snapshot.revision = 7;
        snapshot.state.phase = RunPhase::Idle;
        ui.apply(UiInbound::State {
            update: snapshot.clone(),
            resync: true,
        });

        // a broadcast sent before the break shows up late
        let mut stale = update_with(NotificationKind::TaskStarted, Some(&task));
        stale.revision = 5;
        let events = ui.apply(UiInbound::State {
            update: stale,
            resync: false,
        });
        assert!(events.is_empty());
        assert_eq!(ui.latest(), Some(&snapshot));

        let mut fresh = update_with(NotificationKind::TaskStarted, Some(&task));
        fresh.revision = 8;
        let events = ui.apply(UiInbound::State {
            update: fresh,
            resync: false,
        });
        assert_eq!(events.len(), 1);
        assert_eq!(ui.latest().map(|u| u.revision), Some(8));

        // the request relayed across the break is still answered
        assert_eq!(ui.pending_requests(), 1);
        let events = ui.apply(UiInbound::Response {
            correlation_id: request,
            reply: ControllerReply::ok("Task delay set to 3s."),
        });
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn responses_pair_with_requests_once() {
        let mut ui = client();
        let id = ui.begin_request();
        let response = UiInbound::Response {
            correlation_id: id,
            reply: ControllerReply::ok("2 tasks added to queue."),
        };

        assert_eq!(ui.apply(response.clone()).len(), 1);
        assert!(ui.apply(response).is_empty());
        assert_eq!(ui.pending_requests(), 0);
    }

    #[tokio::test]
    async fn communication_error_is_surfaced_and_logged() {
        let mut ui = client().with_history(store()).await.unwrap();
        let id = ui.begin_request();

        let events = ui.apply(UiInbound::CommunicationError {
            reason: "counterpart unreachable".into(),
            original: UiCommand::Stop,
            correlation_id: Some(id),
        });

        assert_eq!(
            events,
            vec![UiEvent::DeliveryFailed {
                command: "STOP",
                reason: "counterpart unreachable".into(),
                correlation_id: Some(id),
            }]
        );
        assert_eq!(ui.pending_requests(), 0);
        assert_eq!(ui.history()[0].content, "Could not deliver STOP: counterpart unreachable");
    }

    #[tokio::test]
    async fn history_survives_a_new_client() {
        let store = store();
        let mut ui = client().with_history(store.clone()).await.unwrap();
        ui.record_user_action("start 3 prompts");
        ui.apply(UiInbound::State {
            update: update_with(NotificationKind::BatchStopped, None),
            resync: false,
        });
        ui.persist_history().await.unwrap();
        let session = ui.session();

        let reopened = client().with_history(store).await.unwrap();
        assert_eq!(reopened.session(), session);
        let contents: Vec<&str> = reopened.history().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["start 3 prompts", "Batch stopped"]);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let mut ui = client().with_history(store()).await.unwrap();
        for i in 0..(HISTORY_LIMIT + 5) {
            ui.record_user_action(format!("action {i}"));
        }
        assert_eq!(ui.history().len(), HISTORY_LIMIT);
        assert_eq!(ui.history()[0].content, "action 5");
    }
}
