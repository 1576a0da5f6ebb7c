//! AgentHost - the page-side runtime.
//!
//! Receives controller commands, runs the `PageAutomation` for each task and
//! turns what the page's network hook observes into `AgentEvent`s.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{AgentCommand, AgentEvent, AgentMessage, StatusChange};
use crate::ports::{AgentReporter, Clock, PageAutomation};
use crate::queue::{Task, TaskStatus};

/// Error recorded when the page reports a failure without a reason.
pub const UNKNOWN_PAGE_ERROR: &str = "Unknown error from page";

/// One controller command as delivered to the agent inbox. `ack` is answered
/// once the command was taken in; pings only use the ack.
#[derive(Debug)]
pub struct AgentRequest {
    pub command: AgentCommand,
    pub ack: Option<oneshot::Sender<()>>,
}

impl AgentRequest {
    pub fn command(command: AgentCommand) -> Self {
        Self { command, ack: None }
    }

    pub fn ping() -> (Self, oneshot::Receiver<()>) {
        let (ack, pong) = oneshot::channel();
        let request = Self {
            command: AgentCommand::Ping,
            ack: Some(ack),
        };
        (request, pong)
    }
}

/// Status as observed by the page's network hook.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageStatusReport {
    #[serde(default)]
    pub external_id: Option<String>,
    pub status: String,
    /// Fraction in `0.0..=1.0`.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result_ref: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl PageStatusReport {
    /// Parse a JSON body captured by the page's network hook.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Map a raw page status string onto a task status.
///
/// `None` means the string is not understood; callers log and drop it.
pub fn map_page_status(raw: &str) -> Option<TaskStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "succeeded" | "completed" => Some(TaskStatus::Succeeded),
        "failed" | "error" => Some(TaskStatus::Failed),
        "processing" | "generating" | "pending_processing" | "running" => {
            Some(TaskStatus::InProgress)
        }
        "pending_submission" | "queued" => Some(TaskStatus::Submitting),
        "pending" => Some(TaskStatus::Pending),
        _ => None,
    }
}

pub struct AgentHost {
    automation: Arc<dyn PageAutomation>,
    reporter: Arc<dyn AgentReporter>,
    clock: Arc<dyn Clock>,
    /// Task currently on the page; dropped on `ClearContext`.
    current: Mutex<Option<Task>>,
}

impl AgentHost {
    pub fn new(
        automation: Arc<dyn PageAutomation>,
        reporter: Arc<dyn AgentReporter>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            automation,
            reporter,
            clock,
            current: Mutex::new(None),
        })
    }

    /// Serve controller commands until the inbox closes.
    pub fn spawn(self: &Arc<Self>, mut inbox: mpsc::Receiver<AgentRequest>) -> JoinHandle<()> {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = inbox.recv().await {
                host.handle(request).await;
            }
            debug!("agent inbox closed");
        })
    }

    pub async fn handle(self: &Arc<Self>, request: AgentRequest) {
        match request.command {
            AgentCommand::ExecuteTask { task } => {
                *self.current.lock().await = Some(task.clone());
                let host = Arc::clone(self);
                tokio::spawn(async move { host.execute(task).await });
            }
            AgentCommand::ClearContext => self.clear_context().await,
            AgentCommand::Ping => {}
        }
        if let Some(ack) = request.ack {
            let _ = ack.send(());
        }
    }

    /// Run the page interaction for `task`. Only interaction failures are
    /// reported here; everything else arrives through the network hook.
    pub async fn execute(&self, task: Task) {
        info!(task_id = %task.id, index = task.original_index, "executing task on page");
        *self.current.lock().await = Some(task.clone());

        match self.automation.submit(&task).await {
            Ok(()) => debug!(task_id = %task.id, "page interaction done"),
            Err(reason) => {
                warn!(task_id = %task.id, %reason, "page interaction failed");
                {
                    let mut current = self.current.lock().await;
                    if current.as_ref().is_some_and(|t| t.id == task.id) {
                        *current = None;
                    }
                }
                self.report(AgentMessage::Event(AgentEvent::InteractionFailed {
                    task_id: task.id,
                    error: reason,
                }))
                .await;
            }
        }
    }

    pub async fn announce_ready(&self, page_url: Option<String>) {
        self.report(AgentMessage::AgentReady { page_url }).await;
    }

    /// The page context is going away.
    pub async fn announce_closed(&self) {
        *self.current.lock().await = None;
        self.report(AgentMessage::Closed).await;
    }

    /// The page accepted the current task's request under `external_id`.
    ///
    /// Returns `false` when no task is in flight.
    pub async fn report_submitted(&self, external_id: &str, at: Option<DateTime<Utc>>) -> bool {
        let at = at.unwrap_or_else(|| self.clock.now());
        let task_id = {
            let mut current = self.current.lock().await;
            let Some(task) = current.as_mut() else {
                warn!(%external_id, "submission observed with no task in flight");
                return false;
            };
            task.mark_submitted(external_id, at);
            task.id
        };
        self.report(AgentMessage::Event(AgentEvent::Submitted {
            task_id,
            external_id: external_id.to_string(),
            at,
        }))
        .await;
        true
    }

    /// Forward a status observed for an external id.
    ///
    /// Returns `false` when the report was dropped.
    pub async fn report_status(&self, report: PageStatusReport) -> bool {
        let Some(status) = map_page_status(&report.status) else {
            warn!(status = %report.status, "unparseable page status dropped");
            return false;
        };
        let Some(external_id) = report.external_id else {
            warn!(%status, "page status without external id dropped");
            return false;
        };

        if status.is_terminal() {
            let mut current = self.current.lock().await;
            if current
                .as_ref()
                .is_some_and(|t| t.external_id.as_deref() == Some(external_id.as_str()))
            {
                *current = None;
            }
        }

        let mut change = StatusChange::for_external(external_id, status);
        change.progress = report.progress;
        change.result_ref = report.result_ref;
        if status == TaskStatus::Failed {
            change.error = Some(
                report
                    .failure_reason
                    .unwrap_or_else(|| UNKNOWN_PAGE_ERROR.to_string()),
            );
        }
        self.report(AgentMessage::Event(AgentEvent::StatusChanged(change)))
            .await;
        true
    }

    /// Same as `report_status`, from a raw JSON body.
    pub async fn report_status_json(&self, body: &str) -> bool {
        match PageStatusReport::from_json(body) {
            Ok(report) => self.report_status(report).await,
            Err(err) => {
                warn!(error = %err, "malformed page status body dropped");
                false
            }
        }
    }

    pub async fn clear_context(&self) {
        *self.current.lock().await = None;
        self.automation.clear().await;
        debug!("agent context cleared");
    }

    pub async fn current_task(&self) -> Option<Task> {
        self.current.lock().await.clone()
    }

    async fn report(&self, message: AgentMessage) {
        if let Err(err) = self.reporter.report(message).await {
            warn!(error = %err, "could not reach controller");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AspectRatio, TaskId, TransportError};
    use crate::ports::SystemClock;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::Mutex as StdMutex;

    struct ScriptedPage {
        fail_with: Option<String>,
        cleared: StdMutex<usize>,
    }

    #[async_trait]
    impl PageAutomation for ScriptedPage {
        async fn submit(&self, _task: &Task) -> Result<(), String> {
            match &self.fail_with {
                Some(reason) => Err(reason.clone()),
                None => Ok(()),
            }
        }

        async fn clear(&self) {
            *self.cleared.lock().unwrap() += 1;
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        messages: StdMutex<Vec<AgentMessage>>,
    }

    #[async_trait]
    impl AgentReporter for RecordingReporter {
        async fn report(&self, message: AgentMessage) -> Result<(), TransportError> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn host(fail_with: Option<&str>) -> (Arc<AgentHost>, Arc<ScriptedPage>, Arc<RecordingReporter>) {
        let page = Arc::new(ScriptedPage {
            fail_with: fail_with.map(str::to_string),
            cleared: StdMutex::new(0),
        });
        let reporter = Arc::new(RecordingReporter::default());
        let host = AgentHost::new(page.clone(), reporter.clone(), Arc::new(SystemClock));
        (host, page, reporter)
    }

    fn task() -> Task {
        Task::new(
            TaskId::generate(),
            1,
            "a lighthouse at dusk",
            AspectRatio::Landscape,
            2,
            Utc::now(),
        )
    }

    #[rstest]
    #[case("succeeded", Some(TaskStatus::Succeeded))]
    #[case("COMPLETED", Some(TaskStatus::Succeeded))]
    #[case("error", Some(TaskStatus::Failed))]
    #[case("generating", Some(TaskStatus::InProgress))]
    #[case("pending_processing", Some(TaskStatus::InProgress))]
    #[case("queued", Some(TaskStatus::Submitting))]
    #[case("pending", Some(TaskStatus::Pending))]
    #[case("cancelled", None)]
    #[case("", None)]
    fn page_status_mapping(#[case] raw: &str, #[case] expected: Option<TaskStatus>) {
        assert_eq!(map_page_status(raw), expected);
    }

    #[tokio::test]
    async fn submission_is_reported_for_current_task() {
        let (host, _, reporter) = host(None);
        let task = task();
        host.execute(task.clone()).await;

        assert!(host.report_submitted("gen_1", None).await);
        let cached = host.current_task().await.unwrap();
        assert_eq!(cached.external_id.as_deref(), Some("gen_1"));

        let messages = reporter.messages.lock().unwrap();
        assert!(matches!(
            &messages[..],
            [AgentMessage::Event(AgentEvent::Submitted { task_id, external_id, .. })]
                if *task_id == task.id && external_id == "gen_1"
        ));
    }

    #[tokio::test]
    async fn submission_without_task_is_dropped() {
        let (host, _, reporter) = host(None);
        assert!(!host.report_submitted("gen_1", None).await);
        assert!(reporter.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn interaction_failure_is_reported() {
        let (host, _, reporter) = host(Some("send button disabled"));
        let task = task();
        host.execute(task.clone()).await;

        assert!(host.current_task().await.is_none());
        let messages = reporter.messages.lock().unwrap();
        assert_eq!(
            messages[0],
            AgentMessage::Event(AgentEvent::InteractionFailed {
                task_id: task.id,
                error: "send button disabled".into(),
            })
        );
    }

    #[tokio::test]
    async fn failed_status_without_reason_gets_default_error() {
        let (host, _, reporter) = host(None);
        let report = PageStatusReport {
            external_id: Some("gen_9".into()),
            status: "failed".into(),
            ..Default::default()
        };
        assert!(host.report_status(report).await);

        let messages = reporter.messages.lock().unwrap();
        let AgentMessage::Event(AgentEvent::StatusChanged(change)) = &messages[0] else {
            panic!("expected a status change");
        };
        assert_eq!(change.status, TaskStatus::Failed);
        assert_eq!(change.error.as_deref(), Some(UNKNOWN_PAGE_ERROR));
        assert_eq!(change.external_id.as_deref(), Some("gen_9"));
    }

    #[tokio::test]
    async fn json_status_bodies_are_parsed() {
        let (host, _, reporter) = host(None);
        let body = r#"{"external_id":"gen_3","status":"generating","progress":0.4}"#;
        assert!(host.report_status_json(body).await);
        assert!(!host.report_status_json("{not json").await);

        let messages = reporter.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let AgentMessage::Event(AgentEvent::StatusChanged(change)) = &messages[0] else {
            panic!("expected a status change");
        };
        assert_eq!(change.status, TaskStatus::InProgress);
        assert_eq!(change.progress, Some(0.4));
    }

    #[tokio::test]
    async fn unparseable_or_anonymous_status_is_dropped() {
        let (host, _, reporter) = host(None);
        let unknown = PageStatusReport {
            external_id: Some("gen_1".into()),
            status: "mystery".into(),
            ..Default::default()
        };
        let anonymous = PageStatusReport {
            status: "running".into(),
            ..Default::default()
        };
        assert!(!host.report_status(unknown).await);
        assert!(!host.report_status(anonymous).await);
        assert!(reporter.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_status_releases_cached_task() {
        let (host, _, _) = host(None);
        host.execute(task()).await;
        host.report_submitted("gen_2", None).await;

        let report = PageStatusReport {
            external_id: Some("gen_2".into()),
            status: "completed".into(),
            result_ref: Some("https://cdn.test/2.png".into()),
            ..Default::default()
        };
        host.report_status(report).await;
        assert!(host.current_task().await.is_none());
    }

    #[tokio::test]
    async fn inbox_serves_clear_and_ping() {
        let (host, page, _) = host(None);
        let (tx, rx) = mpsc::channel(4);
        let join = host.spawn(rx);

        host.execute(task()).await;
        tx.send(AgentRequest::command(AgentCommand::ClearContext))
            .await
            .unwrap();
        let (ping, pong) = AgentRequest::ping();
        tx.send(ping).await.unwrap();
        pong.await.unwrap();

        assert!(host.current_task().await.is_none());
        assert_eq!(*page.cleared.lock().unwrap(), 1);

        drop(tx);
        join.await.unwrap();
    }
}
