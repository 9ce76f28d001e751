//! SchedulerActor - Drives per-device polling
//!
//! A single actor owns the ready queue; polls run concurrently in a
//! bounded `JoinSet` and apply their results to the shared state
//! themselves, so one slow device never holds up another.
//!
//! ## Queue Order
//!
//! ```text
//! earliest due first → higher priority first → device name
//! ```
//!
//! ## Rescheduling
//!
//! ```text
//! dispatched at T  →  next due = T + interval - jitter      (jitter ∈ [0, fraction × interval])
//! completed later  →  due = max(next due, completion time)
//! ```
//!
//! Jitter is subtracted, so a device is never polled less often than its
//! interval even with jitter applied. New devices are due immediately,
//! without jitter.
//!
//! ## Message Flow
//!
//! ```text
//! Queue due → dispatch (≤ max_in_flight) → poll with timeout → StateEngine → EventManager
//!     ↑                                                              │
//!     └─── Commands (PollNow, UpdateRegistry, GetStats, Shutdown)    └→ PollEvent broadcast
//! ```

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::SchedulerConfig;
use crate::daemon::DaemonState;
use crate::devices::{Device, Registry, RegistryDiff, diff};
use crate::monitors::PollOutcome;
use crate::snmp::DevicePoller;

use super::messages::{PollEvent, PollStatus, SchedulerCommand, SchedulerStats};

/// Sleep horizon when nothing is queued
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// A device waiting in the ready queue
#[derive(Debug, Clone)]
struct PollJob {
    due: Instant,
    device: Arc<Device>,

    /// Jobs from before a registry change of their device are skipped
    generation: u64,
}

impl PartialEq for PollJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PollJob {}

impl PartialOrd for PollJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PollJob {
    /// "Greater" runs first in the max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| self.device.priority.cmp(&other.device.priority))
            .then_with(|| other.device.name.cmp(&self.device.name))
            .then_with(|| self.generation.cmp(&other.generation))
    }
}

/// Result of one spawned poll task
#[derive(Debug)]
struct PollCompletion {
    device: String,
    dispatched: Instant,
    status: PollStatus,
    events: Vec<crate::events::EventId>,
}

/// Tunables taken from the `[scheduler]` config section
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub poll_timeout: Duration,
    pub max_in_flight: usize,
    pub jitter: f64,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            max_in_flight: config.max_in_flight.max(1),
            jitter: config.jitter,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// Random offset in `[0, fraction × interval]`
fn jitter(interval: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return Duration::ZERO;
    }
    let factor = rand::thread_rng().gen_range(0.0..=fraction.min(1.0));
    interval.mul_f64(factor)
}

pub struct SchedulerActor {
    state: Arc<DaemonState>,
    poller: DevicePoller,
    settings: SchedulerSettings,
    registry: Registry,
    queue: BinaryHeap<PollJob>,
    generations: HashMap<String, u64>,
    in_flight: HashSet<String>,
    polls: JoinSet<PollCompletion>,

    /// Device and dispatch time of every running poll task
    tasks: HashMap<task::Id, (String, Instant)>,
    waiters: HashMap<String, Vec<oneshot::Sender<Result<PollStatus>>>>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    poll_tx: broadcast::Sender<PollEvent>,
    stats: SchedulerStats,
}

impl SchedulerActor {
    pub fn new(
        state: Arc<DaemonState>,
        poller: DevicePoller,
        settings: SchedulerSettings,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        poll_tx: broadcast::Sender<PollEvent>,
    ) -> Self {
        Self {
            state,
            poller,
            settings,
            registry: Registry::default(),
            queue: BinaryHeap::new(),
            generations: HashMap::new(),
            in_flight: HashSet::new(),
            polls: JoinSet::new(),
            tasks: HashMap::new(),
            waiters: HashMap::new(),
            command_rx,
            poll_tx,
            stats: SchedulerStats::default(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command arrives, or until the command channel
    /// is closed and nothing is left to poll.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        loop {
            self.dispatch_due();

            let can_dispatch = self.in_flight.len() < self.settings.max_in_flight;
            let wake_at = self
                .queue
                .peek()
                .map(|job| job.due)
                .unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

            tokio::select! {
                Some(joined) = self.polls.join_next_with_id(), if !self.polls.is_empty() => {
                    match joined {
                        Ok((id, completion)) => {
                            self.tasks.remove(&id);
                            self.complete(completion);
                        }
                        Err(e) => self.task_failed(e),
                    }
                }

                _ = sleep_until(wake_at), if can_dispatch && !self.queue.is_empty() => {}

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::PollNow { device, respond_to } => {
                            self.poll_now(device, respond_to);
                        }

                        SchedulerCommand::UpdateRegistry { registry, respond_to } => {
                            let changes = self.update_registry(registry);
                            let _ = respond_to.send(changes);
                        }

                        SchedulerCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.current_stats());
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed and nothing left to poll, shutting down");
                    break;
                }
            }
        }

        self.polls.abort_all();
        self.tasks.clear();
        debug!("scheduler actor stopped");
    }

    fn current_stats(&self) -> SchedulerStats {
        SchedulerStats {
            devices: self.registry.len(),
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
            ..self.stats.clone()
        }
    }

    fn enqueue(&mut self, device: Arc<Device>, due: Instant) {
        let generation = self.generations.get(&device.name).copied().unwrap_or(0);
        trace!("queued {} at +{:?}", device.name, due.saturating_duration_since(Instant::now()));
        self.queue.push(PollJob {
            due,
            device,
            generation,
        });
    }

    /// Invalidate queued jobs of a device
    fn bump_generation(&mut self, name: &str) {
        *self.generations.entry(name.to_string()).or_insert(0) += 1;
    }

    fn is_current(&self, job: &PollJob) -> bool {
        self.registry.contains(&job.device.name)
            && self.generations.get(&job.device.name).copied().unwrap_or(0) == job.generation
    }

    /// Start every due job the in-flight cap allows
    fn dispatch_due(&mut self) {
        let now = Instant::now();

        while self.in_flight.len() < self.settings.max_in_flight {
            let Some(job) = self.queue.peek() else {
                break;
            };
            if job.due > now {
                break;
            }
            let Some(job) = self.queue.pop() else {
                break;
            };

            if !self.is_current(&job) {
                trace!("dropping outdated job for {}", job.device.name);
                continue;
            }
            if self.in_flight.contains(&job.device.name) {
                // completion reschedules it
                continue;
            }

            self.dispatch(job.device, now);
        }
    }

    fn dispatch(&mut self, device: Arc<Device>, now: Instant) {
        trace!("dispatching poll of {}", device.name);
        self.in_flight.insert(device.name.clone());

        let state = self.state.clone();
        let poller = self.poller.clone();
        let poll_timeout = self.settings.poll_timeout;
        let name = device.name.clone();

        let handle = self.polls.spawn(async move {
            let (status, outcome) = match timeout(poll_timeout, poller.poll(&device)).await {
                Ok(Ok(poll)) => (PollStatus::Success, PollOutcome::Success(poll)),
                Ok(Err(e)) => {
                    debug!("poll of {} failed: {e}", device.name);
                    (PollStatus::Failed, PollOutcome::Failure)
                }
                Err(_) => {
                    debug!("poll of {} timed out after {poll_timeout:?}", device.name);
                    (PollStatus::TimedOut, PollOutcome::Failure)
                }
            };
            let events = state.apply_poll(&device.name, outcome, Utc::now());

            PollCompletion {
                device: device.name.clone(),
                dispatched: now,
                status,
                events,
            }
        });
        self.tasks.insert(handle.id(), (name, now));
    }

    /// A poll task panicked or was cancelled; treat it as a failed poll
    fn task_failed(&mut self, error: JoinError) {
        let Some((device, dispatched)) = self.tasks.remove(&error.id()) else {
            warn!("untracked poll task failed: {error}");
            return;
        };
        warn!("poll task for {device} failed: {error}");
        self.complete(PollCompletion {
            device,
            dispatched,
            status: PollStatus::Failed,
            events: Vec::new(),
        });
    }

    fn complete(&mut self, completion: PollCompletion) {
        let PollCompletion {
            device,
            dispatched,
            mut status,
            events,
        } = completion;
        self.in_flight.remove(&device);

        match self.registry.get(&device).cloned() {
            Some(current) => {
                let now = Instant::now();
                let next = dispatched
                    .checked_add(current.interval)
                    .map(|next| {
                        let offset = jitter(current.interval, self.settings.jitter);
                        next.checked_sub(offset).unwrap_or(next)
                    })
                    .unwrap_or_else(|| now + IDLE_WAKEUP);
                self.enqueue(current, next.max(now));
            }
            None => {
                // removed while in flight; keep the entities on their way out
                self.state.engine.mark_device_stale(&device, Utc::now());
                status = PollStatus::Discarded;
            }
        }

        match status {
            PollStatus::Success => self.stats.polls_succeeded += 1,
            PollStatus::Failed => self.stats.polls_failed += 1,
            PollStatus::TimedOut => self.stats.polls_timed_out += 1,
            PollStatus::Discarded => self.stats.polls_discarded += 1,
        }

        if let Some(waiters) = self.waiters.remove(&device) {
            for waiter in waiters {
                let _ = waiter.send(Ok(status));
            }
        }

        let event = PollEvent {
            device,
            status,
            completed: Utc::now(),
            events,
        };
        if self.poll_tx.send(event).is_err() {
            trace!("no receivers for poll event");
        }
    }

    fn poll_now(&mut self, device: String, respond_to: oneshot::Sender<Result<PollStatus>>) {
        let Some(current) = self.registry.get(&device).cloned() else {
            let _ = respond_to.send(Err(anyhow!("unknown device '{device}'")));
            return;
        };

        if !self.in_flight.contains(&device) {
            self.bump_generation(&device);
            self.enqueue(current, Instant::now());
        }
        self.waiters.entry(device).or_default().push(respond_to);
    }

    /// Switch to a new registry and reconcile the queue with it
    fn update_registry(&mut self, registry: Registry) -> RegistryDiff {
        let changes = diff(&self.registry, &registry);
        self.registry = registry;

        let now = Instant::now();
        for device in &changes.added {
            info!("now monitoring {}", device.display_name());
            // entities left over from an earlier removal are monitored again
            self.state.engine.mark_device_present(&device.name);
            self.bump_generation(&device.name);
            if !self.in_flight.contains(&device.name) {
                self.enqueue(device.clone(), now);
            }
        }

        for device in &changes.changed {
            debug!("settings of {} changed", device.name);
            self.state.engine.mark_device_present(&device.name);
            self.bump_generation(&device.name);
            if !self.in_flight.contains(&device.name) {
                self.enqueue(device.clone(), now);
            }
        }

        let wall_clock = Utc::now();
        for name in &changes.removed {
            info!("no longer monitoring {name}");
            self.bump_generation(name);
            self.state.engine.mark_device_stale(name, wall_clock);
            if let Some(waiters) = self.waiters.remove(name) {
                for waiter in waiters {
                    let _ = waiter.send(Err(anyhow!("device '{name}' was removed")));
                }
            }
        }

        changes
    }
}

/// Handle for controlling the SchedulerActor
///
/// Cloneable; every clone talks to the same actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    poll_tx: broadcast::Sender<PollEvent>,
}

impl SchedulerHandle {
    /// Spawn the scheduler with an empty registry
    pub fn spawn(
        state: Arc<DaemonState>,
        poller: DevicePoller,
        settings: SchedulerSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (poll_tx, _) = broadcast::channel(1024);

        let actor = SchedulerActor::new(state, poller, settings, cmd_rx, poll_tx.clone());
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            poll_tx,
        }
    }

    /// Receive a [`PollEvent`] for every completed poll
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.poll_tx.subscribe()
    }

    /// Poll a device immediately and wait for the result
    pub async fn poll_now(&self, device: &str) -> Result<PollStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PollNow {
                device: device.to_string(),
                respond_to: tx,
            })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Hand over a new registry
    pub async fn update_registry(&self, registry: Registry) -> Result<RegistryDiff> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::UpdateRegistry {
                registry,
                respond_to: tx,
            })
            .await
            .context("failed to send UpdateRegistry command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn get_stats(&self) -> Result<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
