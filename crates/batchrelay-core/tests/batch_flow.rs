//! End-to-end runs through controller, agent host, bridge and UI client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use batchrelay_core::app::{
    AgentHost, ControllerService, MessageBridge, PageStatusReport, UiClient, UiEvent,
};
use batchrelay_core::config::ConnectionSettings;
use batchrelay_core::domain::{
    AspectRatio, BatchSpec, NotificationKind, RunPhase, UiCommand, UiInbound,
};
use batchrelay_core::impls::{ChannelAgentLink, InProcessControllerLink};
use batchrelay_core::ports::{PageAutomation, SystemClock, UlidGenerator};
use batchrelay_core::queue::{Task, TaskStatus};

/// Page that accepts every request and forwards it to the test's hook.
struct AcceptingPage {
    accepted: mpsc::UnboundedSender<Task>,
}

#[async_trait]
impl PageAutomation for AcceptingPage {
    async fn submit(&self, task: &Task) -> Result<(), String> {
        self.accepted
            .send(task.clone())
            .map_err(|_| "hook gone".to_string())
    }
}

struct Rig {
    controller: ControllerService,
    host: Arc<AgentHost>,
    bridge: MessageBridge,
    controller_link: Arc<InProcessControllerLink>,
    ui: UiClient,
    ui_rx: mpsc::UnboundedReceiver<UiInbound>,
    accepted: mpsc::UnboundedReceiver<Task>,
}

async fn rig(delay: Duration) -> Rig {
    let clock = Arc::new(SystemClock);
    let ids = Arc::new(UlidGenerator::new(SystemClock));

    let (agent_tx, agent_rx) = mpsc::channel(16);
    let controller = ControllerService::spawn(
        Arc::new(ChannelAgentLink::new(agent_tx, Duration::from_secs(5))),
        clock.clone(),
        ids.clone(),
        delay,
    );
    let handle = controller.handle();

    let (page_tx, accepted) = mpsc::unbounded_channel();
    let host = AgentHost::new(
        Arc::new(AcceptingPage { accepted: page_tx }),
        Arc::new(handle.clone()),
        clock.clone(),
    );
    host.spawn(agent_rx);
    host.announce_ready(Some("https://example.test".into())).await;

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let controller_link = Arc::new(InProcessControllerLink::new(
        handle,
        Duration::from_secs(5),
    ));
    let bridge = MessageBridge::new(
        controller_link.clone(),
        ui_tx,
        ConnectionSettings::default(),
        clock.clone(),
    );
    bridge.start().await;

    Rig {
        controller,
        host,
        bridge,
        controller_link,
        ui: UiClient::new(ids, clock),
        ui_rx,
        accepted,
    }
}

fn spec(n: usize) -> BatchSpec {
    BatchSpec {
        prompts: (1..=n).map(|i| format!("prompt {i}")).collect(),
        quantity: 4,
        aspect_ratio: AspectRatio::Landscape,
    }
}

impl Rig {
    async fn start(&mut self, n: usize) {
        let request = self.ui.begin_request();
        self.bridge
            .relay_to_controller(UiCommand::StartBatch(spec(n)), Some(request))
            .await
            .unwrap();
    }

    /// Pump bridge output into the UI client until `kind` is announced.
    async fn wait_for(&mut self, kind: NotificationKind) -> Vec<UiEvent> {
        let mut events = Vec::new();
        loop {
            let inbound = self.ui_rx.recv().await.expect("bridge output closed");
            let batch = self.ui.apply(inbound);
            let done = batch.iter().any(
                |e| matches!(e, UiEvent::Notified { notification, .. } if notification.kind == kind),
            );
            events.extend(batch);
            if done {
                return events;
            }
        }
    }

    /// Complete the next accepted task through the page hook.
    async fn complete_next(&mut self, index: usize) {
        let task = self.accepted.recv().await.expect("page hook closed");
        let external_id = format!("gen_{index}");
        assert!(self.host.report_submitted(&external_id, None).await);
        self.host
            .report_status(PageStatusReport {
                external_id: Some(external_id.clone()),
                status: "generating".into(),
                progress: Some(0.5),
                ..Default::default()
            })
            .await;
        self.host
            .report_status(PageStatusReport {
                external_id: Some(external_id),
                status: "completed".into(),
                result_ref: Some(format!("https://cdn.test/{}.png", task.original_index)),
                ..Default::default()
            })
            .await;
    }

    async fn shutdown(self) {
        self.bridge.shutdown().await;
        self.controller.shutdown_and_join().await;
    }
}

#[tokio::test(start_paused = true)]
async fn batch_runs_to_completion_in_order() {
    let mut rig = rig(Duration::from_secs(1)).await;
    rig.start(3).await;

    for index in 1..=3 {
        rig.complete_next(index).await;
    }
    let events = rig.wait_for(NotificationKind::BatchCompleted).await;
    assert!(events.iter().any(|e| matches!(e, UiEvent::Replied { .. })));
    assert_eq!(rig.ui.pending_requests(), 0);

    let state = &rig.ui.latest().unwrap().state;
    assert_eq!(state.phase, RunPhase::Idle);
    assert!(state.active.is_none());
    let indices: Vec<u32> = state.queue.iter().map(|t| t.original_index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert!(state.queue.iter().all(|t| t.status == TaskStatus::Succeeded));
    assert_eq!(
        state.queue[2].result_ref.as_deref(),
        Some("https://cdn.test/3.png")
    );
    assert!(state.queue.iter().all(|t| t.image_quantity == 4));

    // BatchCompleted instructs the agent to drop its context
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(rig.host.current_task().await.is_none());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn closing_the_page_mid_task_stops_the_batch() {
    let mut rig = rig(Duration::ZERO).await;
    rig.start(2).await;

    let first = rig.accepted.recv().await.unwrap();
    rig.host.report_submitted("gen_1", None).await;
    rig.host.announce_closed().await;

    rig.wait_for(NotificationKind::BatchStopped).await;
    let state = &rig.ui.latest().unwrap().state;
    assert_eq!(state.phase, RunPhase::Idle);
    assert_eq!(state.queue[0].id, first.id);
    assert_eq!(state.queue[0].status, TaskStatus::Failed);
    assert_eq!(state.queue[0].error.as_deref(), Some("counterpart closed"));
    assert_eq!(state.queue[1].status, TaskStatus::Pending);
    assert!(rig.accepted.try_recv().is_err());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bridge_recovers_a_dropped_controller_link() {
    let mut rig = rig(Duration::ZERO).await;
    rig.controller_link.disconnect();

    let link = rig.controller_link.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        link.reconnect();
    });

    let request = rig.ui.begin_request();
    rig.bridge
        .relay_to_controller(UiCommand::SetDelay { seconds: 7 }, Some(request))
        .await
        .unwrap();

    let mut resynced = false;
    let mut replied = false;
    while let Ok(inbound) = rig.ui_rx.try_recv() {
        for event in rig.ui.apply(inbound) {
            resynced |= event == UiEvent::Resynced;
            replied |= matches!(event, UiEvent::Replied { correlation_id, .. } if correlation_id == request);
        }
    }
    assert!(resynced);
    assert!(replied);

    // the listener was re-registered: broadcasts flow again
    rig.start(1).await;
    rig.wait_for(NotificationKind::BatchStarted).await;
    assert_eq!(rig.ui.latest().unwrap().state.inter_task_delay_ms, 7_000);
    rig.shutdown().await;
}
