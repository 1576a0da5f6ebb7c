//! ConnectionSupervisor - heartbeat and bounded repair of one link.
//!
//! # Lifecycle
//! - `schedule_polling` probes the link on a fixed tier interval
//! - a failed probe past the threshold, or a transport error, triggers
//!   `rebuild`
//! - `rebuild` is single-flight and gives up after `max_attempts` cycles
//!   for a cool-down window, then starts over
//!
//! Counters live behind a tokio `Mutex` that is never held across a call into
//! the link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ConnectionSettings;
use crate::ports::{Clock, SupervisedLink};
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        self == Visibility::Visible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The link answered again and was resynced.
    Recovered,
    /// This cycle did not bring the link back.
    Failed,
    /// Another rebuild is in flight.
    AlreadyRunning,
    /// Attempts exhausted; waiting out the cool-down.
    Suppressed,
}

/// Snapshot of the supervisor's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub consecutive_failures: u32,
    pub reconnect_attempts: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub is_reconnecting: bool,
    pub poll_interval: Duration,
    pub cooling_down: bool,
}

#[derive(Debug)]
struct Counters {
    consecutive_failures: u32,
    reconnect_attempts: u32,
    last_success_at: Option<DateTime<Utc>>,
    poll_interval: Duration,
    cooldown_until: Option<Instant>,
}

impl Counters {
    fn new(poll_interval: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            reconnect_attempts: 0,
            last_success_at: None,
            poll_interval,
            cooldown_until: None,
        }
    }

    fn mark_connected(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.reconnect_attempts = 0;
        self.cooldown_until = None;
        self.last_success_at = Some(now);
    }
}

/// Clears the single-flight flag even when the rebuild future is dropped
/// half way (poller aborted).
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ConnectionSupervisor {
    name: &'static str,
    link: Arc<dyn SupervisedLink>,
    settings: ConnectionSettings,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    counters: Mutex<Counters>,
    reconnecting: AtomicBool,
    visible: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(
        name: &'static str,
        link: Arc<dyn SupervisedLink>,
        settings: ConnectionSettings,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let policy = settings.retry_policy();
        let interval = settings.poll_interval(true);
        Arc::new(Self {
            name,
            link,
            settings,
            policy,
            clock,
            counters: Mutex::new(Counters::new(interval)),
            reconnecting: AtomicBool::new(false),
            visible: AtomicBool::new(true),
            poller: Mutex::new(None),
        })
    }

    /// Ping the link once. Returns whether it answered in time.
    pub async fn probe(&self) -> bool {
        let answered = self.ping_link().await;

        let mut counters = self.counters.lock().await;
        if answered {
            if counters.reconnect_attempts > 0 || counters.consecutive_failures > 0 {
                info!(link = self.name, "link healthy again");
            }
            counters.mark_connected(self.clock.now());
        } else {
            counters.consecutive_failures += 1;
            debug!(link = self.name, failures = counters.consecutive_failures, "probe failed");
        }
        answered
    }

    /// Ping within the probe timeout without touching the counters.
    async fn ping_link(&self) -> bool {
        let timeout = self.settings.probe_timeout();
        match tokio::time::timeout(timeout, self.link.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(link = self.name, error = %err, "ping failed");
                false
            }
            Err(_) => {
                warn!(link = self.name, timeout_ms = timeout.as_millis() as u64, "ping timed out");
                false
            }
        }
    }

    /// One heartbeat: probe, and rebuild once failures reach the threshold.
    pub async fn poll_once(&self) {
        if self.probe().await {
            return;
        }
        let failures = self.counters.lock().await.consecutive_failures;
        if failures >= self.settings.failure_threshold {
            self.rebuild().await;
        } else {
            debug!(link = self.name, failures, threshold = self.settings.failure_threshold, "below rebuild threshold");
        }
    }

    /// Replace the running heartbeat with one at the tier interval.
    pub async fn schedule_polling(self: &Arc<Self>, visibility: Visibility) {
        let interval = self.settings.poll_interval(visibility.is_visible());
        let mut poller = self.poller.lock().await;
        if let Some(previous) = poller.take() {
            previous.abort();
        }
        self.counters.lock().await.poll_interval = interval;

        let supervisor: Weak<Self> = Arc::downgrade(self);
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(supervisor) = supervisor.upgrade() else {
                    break;
                };
                supervisor.poll_once().await;
            }
        }));
        debug!(link = self.name, interval_ms = interval.as_millis() as u64, "polling scheduled");
    }

    /// Tear the link down and bring it back.
    pub async fn rebuild(&self) -> RebuildOutcome {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!(link = self.name, "rebuild already in flight");
            return RebuildOutcome::AlreadyRunning;
        }
        let _flight = FlightGuard(&self.reconnecting);

        let attempt = {
            let mut counters = self.counters.lock().await;
            if let Some(until) = counters.cooldown_until {
                if Instant::now() < until {
                    debug!(link = self.name, "rebuild suppressed during cool-down");
                    return RebuildOutcome::Suppressed;
                }
                info!(link = self.name, "cool-down over; resuming reconnection");
                counters.cooldown_until = None;
                counters.reconnect_attempts = 0;
                counters.consecutive_failures = 0;
            }
            if !self.policy.allows(counters.reconnect_attempts) {
                counters.cooldown_until = Some(Instant::now() + self.settings.cooldown());
                return RebuildOutcome::Suppressed;
            }
            counters.reconnect_attempts += 1;
            counters.reconnect_attempts
        };

        info!(link = self.name, attempt, max_attempts = self.policy.max_attempts, "rebuilding link");
        let mut attached = match self.link.reattach().await {
            Ok(()) => true,
            Err(err) => {
                warn!(link = self.name, error = %err, "reattach failed");
                false
            }
        };
        tokio::time::sleep(self.policy.next_delay(attempt)).await;

        // counters are only reset once the listener is back as well
        let answered = self.ping_link().await;
        if answered && !attached {
            attached = self.link.reattach().await.is_ok();
        }
        if answered && attached {
            self.counters.lock().await.mark_connected(self.clock.now());
            if let Err(err) = self.link.resync().await {
                warn!(link = self.name, error = %err, "resync after rebuild failed");
            }
            info!(link = self.name, attempt, "link recovered");
            return RebuildOutcome::Recovered;
        }

        let mut counters = self.counters.lock().await;
        if answered {
            warn!(link = self.name, "link answers but listener could not be attached");
        } else {
            counters.consecutive_failures += 1;
        }
        if !self.policy.allows(counters.reconnect_attempts) {
            let cooldown = self.settings.cooldown();
            counters.cooldown_until = Some(Instant::now() + cooldown);
            warn!(link = self.name, cooldown_ms = cooldown.as_millis() as u64, "reconnection attempts exhausted");
        }
        RebuildOutcome::Failed
    }

    /// The transport reported the counterpart unreachable.
    pub async fn on_transport_error(&self) -> RebuildOutcome {
        self.rebuild().await
    }

    pub async fn on_visibility_change(self: &Arc<Self>, visibility: Visibility) {
        let was_visible = self.visible.swap(visibility.is_visible(), Ordering::SeqCst);
        if was_visible == visibility.is_visible() {
            return;
        }

        if visibility.is_visible() {
            tokio::time::sleep(self.settings.settle_delay()).await;
            if self.probe().await {
                if let Err(err) = self.link.resync().await {
                    warn!(link = self.name, error = %err, "resync on foreground failed");
                }
            } else {
                self.rebuild().await;
            }
        }
        self.schedule_polling(visibility).await;
    }

    pub async fn on_network_online(&self) -> bool {
        self.counters.lock().await.consecutive_failures = 0;
        self.probe().await
    }

    /// A message got through on the link; treat it as a successful probe.
    pub async fn record_success(&self) {
        self.counters.lock().await.mark_connected(self.clock.now());
    }

    pub async fn shutdown(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.abort();
        }
        let interval = self.settings.poll_interval(true);
        *self.counters.lock().await = Counters::new(interval);
        debug!(link = self.name, "supervisor shut down");
    }

    pub async fn state(&self) -> ConnectionState {
        let counters = self.counters.lock().await;
        ConnectionState {
            consecutive_failures: counters.consecutive_failures,
            reconnect_attempts: counters.reconnect_attempts,
            last_success_at: counters.last_success_at,
            is_reconnecting: self.reconnecting.load(Ordering::SeqCst),
            poll_interval: counters.poll_interval,
            cooling_down: counters
                .cooldown_until
                .is_some_and(|until| Instant::now() < until),
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.abort();
        }
    }
}
