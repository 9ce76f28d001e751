//! PersistenceActor - Periodically snapshots the daemon state
//!
//! ## Save Triggers
//!
//! - **Period**: every `persistence.period` minutes
//! - **Commit**: any change to the event store or to planned maintenance
//!   pulls the next save forward to at most [`MINIMUM_DUMP_INTERVAL`] from now
//! - **Shutdown**: one final save before the actor exits
//!
//! A failed save is logged and retried on the next period. Copying the
//! state is synchronous and short; serialization and I/O run after the
//! copy, so polls are never blocked on the disk.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, instrument, trace, warn};

use crate::daemon::DaemonState;
use crate::events::EventChange;
use crate::maintenance::PmChange;
use crate::storage::SnapshotBackend;
use crate::util::bounded_period;

use super::messages::{PersistenceCommand, PersistenceStats};

/// Lower bound between commit-triggered saves
pub const MINIMUM_DUMP_INTERVAL: Duration = Duration::from_secs(10);

pub struct PersistenceActor {
    state: Arc<DaemonState>,
    backend: Arc<dyn SnapshotBackend>,
    period: Duration,
    command_rx: mpsc::Receiver<PersistenceCommand>,
    change_rx: broadcast::Receiver<EventChange>,
    pm_rx: broadcast::Receiver<PmChange>,
    next_save: Instant,
    stats: PersistenceStats,
}

impl PersistenceActor {
    pub fn new(
        state: Arc<DaemonState>,
        backend: Arc<dyn SnapshotBackend>,
        period: Duration,
        command_rx: mpsc::Receiver<PersistenceCommand>,
    ) -> Self {
        let change_rx = state.events.subscribe();
        let pm_rx = state.maintenance.subscribe();
        let period = bounded_period(period);
        Self {
            state,
            backend,
            period,
            command_rx,
            change_rx,
            pm_rx,
            next_save: Instant::now() + period,
            stats: PersistenceStats::default(),
        }
    }

    #[instrument(skip(self), fields(backend = %self.backend.describe()))]
    pub async fn run(mut self) {
        debug!("starting persistence actor (period {:?})", self.period);
        let mut changes_open = true;
        let mut pm_open = true;

        loop {
            tokio::select! {
                _ = sleep_until(self.next_save) => {
                    if let Err(e) = self.save().await {
                        warn!("periodic save failed, retrying next period: {e:#}");
                    }
                    self.next_save = Instant::now() + self.period;
                }

                result = self.change_rx.recv(), if changes_open => {
                    match result {
                        Ok(change) => {
                            trace!("event store changed: {change:?}");
                            self.pull_forward();
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            trace!("missed {skipped} change notifications");
                            self.pull_forward();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            changes_open = false;
                        }
                    }
                }

                result = self.pm_rx.recv(), if pm_open => {
                    match result {
                        Ok(change) => {
                            trace!("maintenance changed: {change:?}");
                            self.pull_forward();
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => self.pull_forward(),
                        Err(broadcast::error::RecvError::Closed) => {
                            pm_open = false;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        PersistenceCommand::SaveNow { respond_to } => {
                            let result = self.save().await;
                            let _ = respond_to.send(result);
                        }

                        PersistenceCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats.clone());
                        }

                        PersistenceCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command, saving final snapshot");
                            if let Err(e) = self.save().await {
                                warn!("final save failed: {e:#}");
                            }
                            let _ = respond_to.send(());
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

        debug!("persistence actor stopped");
    }

    fn pull_forward(&mut self) {
        let candidate = Instant::now() + MINIMUM_DUMP_INTERVAL;
        if candidate < self.next_save {
            trace!("next save pulled forward");
            self.next_save = candidate;
        }
    }

    async fn save(&mut self) -> Result<()> {
        let now = Utc::now();
        let snapshot = self.state.snapshot(now);

        match self.backend.save(&snapshot).await {
            Ok(()) => {
                self.stats.save_count += 1;
                self.stats.last_save = Some(now);
                debug!(
                    "saved {} events, {} entities",
                    snapshot.events.len(),
                    snapshot.entities.len()
                );
                Ok(())
            }
            Err(e) => {
                self.stats.failed_saves += 1;
                Err(e).context("failed to save snapshot")
            }
        }
    }
}

/// Handle for controlling the PersistenceActor
#[derive(Clone)]
pub struct PersistenceHandle {
    sender: mpsc::Sender<PersistenceCommand>,
}

impl PersistenceHandle {
    pub fn spawn(
        state: Arc<DaemonState>,
        backend: Arc<dyn SnapshotBackend>,
        period: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = PersistenceActor::new(state, backend, period, cmd_rx);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    /// Save a snapshot right away
    pub async fn save_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PersistenceCommand::SaveNow { respond_to: tx })
            .await
            .context("failed to send SaveNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<PersistenceStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PersistenceCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    /// Save a final snapshot and stop; returns once the save has finished
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PersistenceCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive response")
    }
}
