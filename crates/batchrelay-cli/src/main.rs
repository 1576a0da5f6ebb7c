//! batchrelay - run a prompt batch against a simulated generation page.
//!
//! Wires the controller, the page agent, the bridge and a console UI the
//! same way a browser extension would, with channels instead of ports.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use batchrelay_core::app::{
    AgentHost, AgentWatch, ControllerService, MessageBridge, PageStatusReport, UiClient, UiEvent,
};
use batchrelay_core::domain::{
    AspectRatio, BatchSpec, ControllerReply, NotificationKind, RunPhase, UiCommand,
};
use batchrelay_core::impls::{
    ChannelAgentLink, FileSettingsStore, InMemoryHistoryStore, InProcessControllerLink,
};
use batchrelay_core::observability::StatusCounts;
use batchrelay_core::ports::{
    Clock, IdGenerator, PageAutomation, SettingsStore, SystemClock, UlidGenerator,
};
use batchrelay_core::queue::Task;

const AGENT_INBOX: usize = 32;

#[derive(Parser)]
#[command(name = "batchrelay")]
#[command(about = "Queue prompts and feed them to an image generation page one at a time")]
#[command(version)]
struct Cli {
    /// Prompts, one task each
    prompts: Vec<String>,

    /// Read additional prompts from a file, one per line
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Settings file path
    #[arg(short, long, default_value = "batchrelay.toml")]
    config: PathBuf,

    /// Pause between tasks in seconds (overrides the settings file)
    #[arg(short, long)]
    delay: Option<u64>,

    /// Write the --delay override back to the settings file
    #[arg(long)]
    save: bool,

    /// Aspect ratio: 1:1, 2:3 or 3:2
    #[arg(short, long, default_value = "1:1")]
    ratio: AspectRatio,

    /// Images per prompt
    #[arg(short, long, default_value_t = 1)]
    quantity: u32,

    /// Make every Nth page interaction fail
    #[arg(long)]
    fail_every: Option<u32>,

    /// Print the final queue as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    phase: RunPhase,
    counts: StatusCounts,
    tasks: &'a [Task],
}

/// Stand-in for the real page: accepts every request after a short pause
/// and hands it to the simulated network hook.
struct SimulatedPage {
    hook: mpsc::UnboundedSender<Task>,
    fail_every: Option<u32>,
    submitted: AtomicU32,
}

#[async_trait]
impl PageAutomation for SimulatedPage {
    async fn submit(&self, task: &Task) -> Result<(), String> {
        sleep(Duration::from_millis(200)).await;
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every.is_some_and(|every| every > 0 && n % every == 0) {
            return Err("send button not found".to_string());
        }
        self.hook
            .send(task.clone())
            .map_err(|_| "page closed".to_string())
    }
}

/// What the page's network hook would observe for each accepted request.
async fn simulate_network(host: Arc<AgentHost>, mut accepted: mpsc::UnboundedReceiver<Task>) {
    while let Some(task) = accepted.recv().await {
        let external_id = format!("gen_{:04}", task.original_index);
        host.report_submitted(&external_id, None).await;

        for progress in [0.25, 0.5, 0.75] {
            sleep(Duration::from_millis(300)).await;
            host.report_status(PageStatusReport {
                external_id: Some(external_id.clone()),
                status: "generating".into(),
                progress: Some(progress),
                ..Default::default()
            })
            .await;
        }

        sleep(Duration::from_millis(300)).await;
        host.report_status(PageStatusReport {
            external_id: Some(external_id.clone()),
            status: "completed".into(),
            result_ref: Some(format!("sim://images/{external_id}.png")),
            ..Default::default()
        })
        .await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

async fn collect_prompts(cli: &Cli) -> Result<Vec<String>> {
    let mut prompts: Vec<String> = cli.prompts.clone();
    if let Some(path) = &cli.file {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading prompts from {}", path.display()))?;
        prompts.extend(content.lines().map(str::to_string));
    }
    prompts.retain(|p| !p.trim().is_empty());
    Ok(prompts)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let prompts = collect_prompts(&cli).await?;
    if prompts.is_empty() {
        bail!("no prompts given");
    }

    let settings_store = FileSettingsStore::new(&cli.config);
    let mut settings = settings_store
        .load()
        .await
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(delay) = cli.delay {
        settings.general.delay_secs = delay;
        if cli.save {
            settings_store
                .update_delay(delay)
                .await
                .context("saving settings")?;
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
    let timeout = settings.connection.probe_timeout();

    // controller
    let (agent_tx, agent_rx) = mpsc::channel(AGENT_INBOX);
    let agent_link = Arc::new(ChannelAgentLink::new(agent_tx, timeout));
    let controller = ControllerService::spawn(
        agent_link.clone(),
        clock.clone(),
        ids.clone(),
        settings.inter_task_delay(),
    );
    let handle = controller.handle();

    // agent
    let (hook_tx, hook_rx) = mpsc::unbounded_channel();
    let page = Arc::new(SimulatedPage {
        hook: hook_tx,
        fail_every: cli.fail_every,
        submitted: AtomicU32::new(0),
    });
    let host = AgentHost::new(page, Arc::new(handle.clone()), clock.clone());
    let agent_join = host.spawn(agent_rx);
    let network_join = tokio::spawn(simulate_network(host.clone(), hook_rx));
    host.announce_ready(Some("sim://create".into())).await;
    let agent_watch = AgentWatch::new(
        agent_link,
        handle.clone(),
        settings.connection.clone(),
        clock.clone(),
    );
    agent_watch.start().await;

    // bridge + ui
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let link = Arc::new(InProcessControllerLink::new(handle.clone(), timeout));
    let bridge = MessageBridge::new(link, ui_tx, settings.connection.clone(), clock.clone());
    bridge.start().await;

    let history = Arc::new(InMemoryHistoryStore::new(ids.clone(), clock.clone()));
    let mut ui = UiClient::new(ids, clock)
        .with_history(history)
        .await
        .context("opening history")?;

    let spec = BatchSpec {
        prompts,
        quantity: cli.quantity,
        aspect_ratio: cli.ratio,
    };
    ui.record_user_action(format!(
        "start {} prompts ({}, x{})",
        spec.prompts.len(),
        spec.aspect_ratio,
        spec.quantity
    ));
    let request = ui.begin_request();
    bridge
        .relay_to_controller(UiCommand::StartBatch(spec), Some(request))
        .await
        .context("starting batch")?;

    let mut seen_running = false;
    let mut stop_sent = false;
    loop {
        let inbound = tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stop_sent => {
                warn!("interrupted; stopping batch");
                stop_sent = true;
                let request = ui.begin_request();
                ui.record_user_action("stop");
                if let Err(err) = bridge.relay_to_controller(UiCommand::Stop, Some(request)).await {
                    warn!(error = %err, "stop not delivered");
                    break;
                }
                continue;
            }
            inbound = ui_rx.recv() => match inbound {
                Some(inbound) => inbound,
                None => break,
            },
        };

        let mut finished = false;
        for event in ui.apply(inbound) {
            match event {
                UiEvent::Notified { notification, line } => {
                    println!("{line}");
                    finished |= matches!(
                        notification.kind,
                        NotificationKind::BatchCompleted | NotificationKind::BatchStopped
                    );
                }
                UiEvent::Replied { reply, .. } => {
                    if let ControllerReply::Ack { success: false, message } = reply {
                        bail!("batch rejected: {message}");
                    }
                }
                UiEvent::DeliveryFailed { command, reason, .. } => {
                    bail!("{command} not delivered: {reason}");
                }
                UiEvent::Resynced => info!("state resynced"),
            }
        }

        if let Some(update) = ui.latest() {
            match update.phase() {
                RunPhase::Running => seen_running = true,
                RunPhase::Idle if seen_running => finished = true,
                _ => {}
            }
        }
        if finished {
            break;
        }
    }

    if let Some(update) = ui.latest()
        && cli.json
    {
        let summary = RunSummary {
            phase: update.phase(),
            counts: StatusCounts::tally(&update.state.queue),
            tasks: &update.state.queue,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if let Some(update) = ui.latest() {
        for task in &update.state.queue {
            let outcome = task
                .result_ref
                .as_deref()
                .or(task.error.as_deref())
                .unwrap_or("-");
            println!("#{:<3} {:<11} {}", task.original_index, task.status.to_string(), outcome);
        }
    }
    ui.persist_history().await.context("saving history")?;

    bridge.shutdown().await;
    agent_watch.shutdown().await;
    host.announce_closed().await;
    controller.shutdown_and_join().await;
    agent_join.abort();
    network_join.abort();
    Ok(())
}
