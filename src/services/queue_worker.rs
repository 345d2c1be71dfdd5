//! Retry queue worker.
//!
//! Periodically picks up queued and never-attempted receipt files and runs
//! them through the orchestrator one at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::config::QueueSettings;
use crate::db::FileRecordRepository;
use crate::error::AppResult;
use crate::models::ClaimMode;

use super::orchestrator::{ExtractionOrchestrator, ExtractionOutcome, ProcessError};

/// Counters for a single worker tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Abandoned `processing` records moved back to `queued`.
    pub recovered: u64,
    pub selected: usize,
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Records another attempt claimed first.
    pub skipped: usize,
    pub errors: usize,
    /// The tick did not run because the previous one was still going.
    pub overlapped: bool,
}

impl TickReport {
    fn is_idle(&self) -> bool {
        self.recovered == 0 && self.selected == 0 && self.errors == 0 && !self.overlapped
    }
}

/// Scheduling knobs of the worker. Retry limits and backoff belong to the
/// orchestrator's [`RetryPolicy`](super::RetryPolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub interval: Duration,
    pub batch_size: u64,
    pub stale_processing_after: Duration,
}

impl WorkerSettings {
    pub fn from_queue(settings: &QueueSettings) -> Self {
        Self {
            interval: settings.interval,
            batch_size: settings.batch_size,
            stale_processing_after: settings.stale_processing_after,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_queue(&QueueSettings::default())
    }
}

/// Background worker draining the retry queue.
pub struct QueueWorker {
    files: Arc<dyn FileRecordRepository>,
    orchestrator: Arc<ExtractionOrchestrator>,
    settings: WorkerSettings,
    tick_lock: Mutex<()>,
}

impl QueueWorker {
    pub fn new(
        files: Arc<dyn FileRecordRepository>,
        orchestrator: Arc<ExtractionOrchestrator>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            files,
            orchestrator,
            settings,
            tick_lock: Mutex::new(()),
        }
    }

    /// Requeue every record left in `processing` by a previous run.
    ///
    /// Only safe while no attempt is in flight: call it before the server
    /// accepts requests and before [`QueueWorker::start`].
    pub async fn recover_on_startup(&self) -> AppResult<u64> {
        let recovered = self.files.requeue_stalled(Utc::now()).await?;
        if recovered > 0 {
            warn!(target: "queue", "Requeued {} records interrupted by a previous run", recovered);
        }
        Ok(recovered)
    }

    /// Run a single tick: recover stalled records, then process one batch sequentially.
    pub async fn run_once(&self) -> TickReport {
        let mut report = TickReport::default();

        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!(target: "queue", "Previous tick still running, skipping");
            report.overlapped = true;
            return report;
        };

        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.settings.stale_processing_after)
            .unwrap_or_else(|_| chrono::Duration::days(1));

        match self.files.requeue_stalled(now - stale_after).await {
            Ok(recovered) => {
                if recovered > 0 {
                    warn!(target: "queue", "Requeued {} stalled records", recovered);
                }
                report.recovered = recovered;
            }
            Err(e) => {
                error!(target: "queue", "Store unavailable, ending tick early: {}", e);
                report.errors += 1;
                return report;
            }
        }

        let batch = match self
            .files
            .find_retry_candidates(now, self.settings.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!(target: "queue", "Failed to select retry batch, ending tick early: {}", e);
                report.errors += 1;
                return report;
            }
        };

        report.selected = batch.len();

        for record in batch {
            info!(
                target: "queue",
                file_id = %record.id,
                retry_count = record.retry_count,
                "Processing {} (attempt {})",
                record.file_name,
                record.retry_count + 1
            );

            match self.orchestrator.process(record.id, ClaimMode::Worker).await {
                Ok(ExtractionOutcome::Completed { .. }) => report.completed += 1,
                Ok(ExtractionOutcome::Queued { .. }) => report.requeued += 1,
                Ok(ExtractionOutcome::Failed { .. }) => report.failed += 1,
                Err(ProcessError::AlreadyProcessing(id)) => {
                    debug!(target: "queue", file_id = %id, "Claimed by another attempt, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(target: "queue", file_id = %record.id, "Worker attempt failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        report
    }

    /// Spawn the periodic task.
    pub fn start(self: Arc<Self>) -> QueueWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let worker = self;

        let task = tokio::spawn(async move {
            info!(
                target: "queue",
                "Starting retry queue worker (interval: {}s, batch: {}, max retries: {})",
                worker.settings.interval.as_secs(),
                worker.settings.batch_size,
                worker.orchestrator.policy().max_retries
            );

            let mut ticker = interval(worker.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = worker.run_once().await;
                        if !report.is_idle() {
                            info!(
                                target: "queue",
                                "Tick: {} selected, {} completed, {} requeued, {} failed, {} skipped, {} errors",
                                report.selected,
                                report.completed,
                                report.requeued,
                                report.failed,
                                report.skipped,
                                report.errors
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(target: "queue", "Retry queue worker stopped");
        });

        QueueWorkerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running [`QueueWorker`].
pub struct QueueWorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl QueueWorkerHandle {
    /// Stop scheduling ticks and wait for the current one to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(target: "queue", "Retry queue worker task failed: {}", e);
        }
    }
}
