//! HousekeepingActor - Periodic maintenance of the live state
//!
//! ## Passes
//!
//! ```text
//! every AGING_INTERVAL:          maintenance windows → flap aging → entity sweep
//! every archive.check_interval:  closed events past grace → ArchiveSink
//! ```
//!
//! Expired events leave the store only once the sink accepted them; a
//! failing sink puts them back and the next pass retries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::daemon::DaemonState;
use crate::events::ArchiveSink;
use crate::util::bounded_period;

use super::messages::{HousekeepingCommand, HousekeepingReport};

/// How often maintenance windows are updated, flap histories aged and
/// vanished entities swept
pub const AGING_INTERVAL: Duration = Duration::from_secs(60);

pub struct HousekeepingActor {
    state: Arc<DaemonState>,
    archive: Arc<dyn ArchiveSink>,
    expiry_interval: Duration,
    command_rx: mpsc::Receiver<HousekeepingCommand>,
}

impl HousekeepingActor {
    pub fn new(
        state: Arc<DaemonState>,
        archive: Arc<dyn ArchiveSink>,
        expiry_interval: Duration,
        command_rx: mpsc::Receiver<HousekeepingCommand>,
    ) -> Self {
        Self {
            state,
            archive,
            expiry_interval: bounded_period(expiry_interval),
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting housekeeping actor");

        // first passes one period after startup, not immediately
        let start = Instant::now();
        let mut aging = interval_at(start + AGING_INTERVAL, AGING_INTERVAL);
        aging.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut expiry = interval_at(start + self.expiry_interval, self.expiry_interval);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = aging.tick() => {
                    self.minute_pass();
                }

                _ = expiry.tick() => {
                    self.expire().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        HousekeepingCommand::RunNow { respond_to } => {
                            let mut report = self.minute_pass();
                            report.archived = self.expire().await;
                            let _ = respond_to.send(report);
                        }

                        HousekeepingCommand::Shutdown => {
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

        debug!("housekeeping actor stopped");
    }

    fn minute_pass(&self) -> HousekeepingReport {
        let now = Utc::now();
        let maintenance = self.state.update_maintenance(now);
        let settled = self.state.age_flapping(now);
        let dropped = self.state.sweep(now).len();
        if settled > 0 || dropped > 0 {
            debug!("{settled} flapping entities settled, {dropped} entities dropped");
        }
        HousekeepingReport {
            settled,
            dropped,
            maintenance,
            ..HousekeepingReport::default()
        }
    }

    async fn expire(&self) -> usize {
        let expired = self.state.events.expire(Utc::now());
        if expired.is_empty() {
            return 0;
        }

        match self.archive.archive(&expired).await {
            Ok(()) => {
                info!("archived {} closed events", expired.len());
                expired.len()
            }
            Err(e) => {
                warn!("archiving {} events failed, keeping them live: {e}", expired.len());
                self.state.events.reinstate(expired);
                0
            }
        }
    }
}

/// Handle for controlling the HousekeepingActor
#[derive(Clone)]
pub struct HousekeepingHandle {
    sender: mpsc::Sender<HousekeepingCommand>,
}

impl HousekeepingHandle {
    pub fn spawn(
        state: Arc<DaemonState>,
        archive: Arc<dyn ArchiveSink>,
        expiry_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = HousekeepingActor::new(state, archive, expiry_interval, cmd_rx);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    /// Run a full pass now and report what it did
    pub async fn run_now(&self) -> Result<HousekeepingReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HousekeepingCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(HousekeepingCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
