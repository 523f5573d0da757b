//! Cycle Scheduler: drives validation cycles forever.
//!
//! Each pass evaluates the registered peers whose minimum interval has
//! elapsed, then sleeps for the rest of the interval, so verification cost
//! grows with the number of peers and not with how much data they claim.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use crate::engine::{CycleReport, Validator};
use crate::types::Result;

/// Shortest pause between passes, even with a zero interval.
const MIN_PAUSE: Duration = Duration::from_millis(100);

/// Runs [`Validator`] cycles on an interval until shut down.
pub struct CycleScheduler {
    validator: Arc<Validator>,
    state_path: Option<PathBuf>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<mpsc::Receiver<()>>,
}

impl CycleScheduler {
    pub fn new(validator: Arc<Validator>) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            validator,
            state_path: None,
            shutdown_tx,
            shutdown_rx: Mutex::new(shutdown_rx),
        }
    }

    /// Save validator state to `path` after every cycle.
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// Sender that stops [`CycleScheduler::run`] after the current cycle.
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Loop until shutdown is signalled.
    pub async fn run(&self) -> Result<()> {
        let interval = self.validator.config().scheduler.min_interval();
        let mut shutdown_rx = self.shutdown_rx.lock().await;

        info!(interval_secs = interval.as_secs(), "Scheduler started");

        loop {
            let started = Instant::now();

            match self.run_once().await {
                Ok(Some(report)) => debug!(cycle_id = report.cycle_id, "Scheduled cycle complete"),
                Ok(None) => debug!("No peers due"),
                Err(e) => error!(error = %e, "Cycle failed"),
            }

            let pause = interval.saturating_sub(started.elapsed()).max(MIN_PAUSE);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown_rx.recv() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run one cycle over the peers that are due, if any.
    pub async fn run_once(&self) -> Result<Option<CycleReport>> {
        let due = self.validator.due_peers(chrono::Utc::now());
        if due.is_empty() {
            return Ok(None);
        }
        let report = self.run_cycle_for(&due).await?;
        Ok(Some(report))
    }

    /// Run `count` cycles back to back over every registered peer,
    /// ignoring the interval.
    pub async fn run_cycles(&self, count: usize) -> Result<Vec<CycleReport>> {
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            let peers = self.validator.registered_peers();
            reports.push(self.run_cycle_for(&peers).await?);
        }
        Ok(reports)
    }

    async fn run_cycle_for(&self, peers: &[claims::PeerId]) -> Result<CycleReport> {
        let cycle_id = self.validator.last_cycle_id() + 1;
        let report = self.validator.run_cycle(peers, cycle_id).await?;
        if let Some(path) = &self.state_path {
            self.validator.save_state(path).await?;
        }
        Ok(report)
    }
}
