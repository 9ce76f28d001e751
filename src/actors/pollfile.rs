//! PollfileActor - Watches the pollfile and feeds registry changes to the scheduler
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → read pollfile → unchanged? stop
//!                            → parse + validate → Registry::diff → SchedulerHandle::update_registry
//!     ↑
//!     └─── Commands (CheckNow, Shutdown)
//! ```
//!
//! A pollfile that fails to read or validate is reported and otherwise
//! ignored: the scheduler keeps the last good registry.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::devices::{Registry, diff};
use crate::util::bounded_period;

use super::messages::PollfileCommand;
use super::scheduler::SchedulerHandle;

pub struct PollfileActor {
    path: PathBuf,
    period: Duration,
    scheduler: SchedulerHandle,
    command_rx: mpsc::Receiver<PollfileCommand>,

    /// Contents behind the registry currently in effect
    last_content: Option<String>,
    current: Registry,
}

impl PollfileActor {
    pub fn new(
        path: PathBuf,
        period: Duration,
        scheduler: SchedulerHandle,
        command_rx: mpsc::Receiver<PollfileCommand>,
    ) -> Self {
        Self {
            path,
            period: bounded_period(period),
            scheduler,
            command_rx,
            last_content: None,
            current: Registry::default(),
        }
    }

    #[instrument(skip(self), fields(pollfile = %self.path.display()))]
    pub async fn run(mut self) {
        debug!("starting pollfile actor");

        // initial load right away, then every period
        let mut ticker = interval_at(Instant::now(), self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check().await {
                        error!("pollfile check failed, keeping previous devices: {e:#}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        PollfileCommand::CheckNow { respond_to } => {
                            debug!("received CheckNow command");
                            let result = self.check().await;
                            let _ = respond_to.send(result);
                        }

                        PollfileCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("pollfile actor stopped");
    }

    /// Re-read the pollfile; returns whether a new registry was applied
    async fn check(&mut self) -> Result<bool> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        if self.last_content.as_deref() == Some(content.as_str()) {
            trace!("pollfile unchanged");
            return Ok(false);
        }

        let registry = Registry::parse(&content, &self.path)
            .with_context(|| format!("invalid pollfile {}", self.path.display()))?;

        let changes = diff(&self.current, &registry);
        if changes.is_empty() {
            debug!("pollfile rewritten without device changes");
            self.last_content = Some(content);
            return Ok(false);
        }

        info!(
            "pollfile changed: {} added, {} removed, {} changed",
            changes.added.len(),
            changes.removed.len(),
            changes.changed.len()
        );
        self.scheduler
            .update_registry(registry.clone())
            .await
            .context("failed to hand registry to scheduler")?;
        self.current = registry;
        self.last_content = Some(content);
        Ok(true)
    }
}

/// Handle for controlling the PollfileActor
#[derive(Clone)]
pub struct PollfileHandle {
    sender: mpsc::Sender<PollfileCommand>,
}

impl PollfileHandle {
    /// Spawn the watcher; the first check happens immediately
    pub fn spawn(path: PathBuf, period: Duration, scheduler: SchedulerHandle) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = PollfileActor::new(path, period, scheduler, cmd_rx);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    /// Re-read the pollfile now
    pub async fn check_now(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollfileCommand::CheckNow { respond_to: tx })
            .await
            .context("failed to send CheckNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PollfileCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
