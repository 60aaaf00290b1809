//! Periodic upload worker.
//!
//! One [`UploadScheduler`] per feature. Each tick sends up to
//! `max_batches_per_upload_job` readable batches, oldest first, and applies
//! the [`RetentionPolicy`] to every response. The tick stops at the first
//! retained batch: the intake is unhappy, hammering it with the next batch
//! will not help.
//!
//! The delay between ticks adapts. It shrinks by 10% (down to the minimum)
//! after a tick that ended on a delete, and grows by 10% (up to the maximum)
//! after a tick that ended on a retained batch or found nothing to send.
//!
//! Files being uploaded are tracked in an in-flight set passed as the
//! exclusion set to the orchestrator, so a manual `run_once` racing the
//! worker thread never sends the same batch twice.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use spool_common::{Error, InternalLogger, LogLevel, LogTarget, Result};
use spool_config::UploadConfiguration;
use spool_store::{Batch, FeatureStorage, RemovalReason};

use crate::retention::{RetentionDecision, RetentionPolicy};
use crate::uploader::DataUploader;

const DECREASE_FACTOR: f64 = 0.9;
const INCREASE_FACTOR: f64 = 1.1;

/// Outcome of one upload tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadRunReport {
    pub feature: String,
    /// Batches handed to the uploader.
    pub attempted: usize,
    /// Batches removed from disk, including empty ones never sent.
    pub deleted: usize,
    pub retained: usize,
    pub next_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickEnd {
    Deleted,
    Retained,
    Idle,
}

struct Worker {
    stop: mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

pub struct UploadScheduler {
    storage: Arc<FeatureStorage>,
    uploader: Arc<dyn DataUploader>,
    retention: RetentionPolicy,
    config: UploadConfiguration,
    current_delay_ms: AtomicU64,
    in_flight: Mutex<HashSet<PathBuf>>,
    worker: Mutex<Option<Worker>>,
    logger: Arc<dyn InternalLogger>,
}

impl UploadScheduler {
    pub fn new(
        storage: Arc<FeatureStorage>,
        uploader: Arc<dyn DataUploader>,
        retention: RetentionPolicy,
        config: UploadConfiguration,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            storage,
            uploader,
            retention,
            current_delay_ms: AtomicU64::new(config.default_delay_ms),
            config,
            in_flight: Mutex::new(HashSet::new()),
            worker: Mutex::new(None),
            logger,
        }
    }

    pub fn feature(&self) -> &str {
        self.storage.feature()
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.current_delay_ms.load(Ordering::SeqCst)
    }

    /// Run one upload tick on the calling thread.
    pub fn run_once(&self) -> UploadRunReport {
        let mut report = UploadRunReport {
            feature: self.feature().to_string(),
            ..Default::default()
        };
        let mut end = TickEnd::Idle;

        for _ in 0..self.config.max_batches_per_upload_job.max(1) {
            let Some(batch) = self.claim_next_batch() else {
                break;
            };
            let outcome = self.handle_batch(&batch, &mut report);
            self.release(&batch.file);
            end = outcome;
            if outcome == TickEnd::Retained {
                break;
            }
        }

        report.next_delay_ms = self.adjust_delay(end);
        if report.attempted > 0 {
            self.logger.log(
                LogLevel::Debug,
                LogTarget::Maintainer,
                &format!(
                    "{}: upload tick sent {} batches ({} deleted, {} retained), next in {} ms",
                    report.feature,
                    report.attempted,
                    report.deleted,
                    report.retained,
                    report.next_delay_ms
                ),
            );
        }
        report
    }

    /// Start the background worker. Idempotent.
    ///
    /// The worker holds a reference to the scheduler until [`stop`](Self::stop).
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| Error::Config("upload worker state poisoned".to_string()))?;
        if worker.is_some() {
            return Ok(());
        }

        let (stop, stop_rx) = mpsc::channel::<()>();
        let scheduler = Arc::clone(self);
        let thread = thread::Builder::new()
            .name(format!("spool-upload-{}", self.feature()))
            .spawn(move || scheduler.worker_loop(stop_rx))
            .map_err(|e| Error::io(format!("spool-upload-{}", self.feature()), e))?;

        *worker = Some(Worker { stop, thread });
        Ok(())
    }

    /// Stop the background worker, waiting for an in-progress tick to finish.
    pub fn stop(&self) {
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(worker) = worker {
            let _ = worker.stop.send(());
            if worker.thread.join().is_err() {
                self.logger.log(
                    LogLevel::Error,
                    LogTarget::Maintainer,
                    &format!("{}: upload worker panicked", self.feature()),
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn worker_loop(&self, stop: mpsc::Receiver<()>) {
        loop {
            let delay = Duration::from_millis(self.current_delay_ms());
            match stop.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {
                    self.run_once();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn claim_next_batch(&self) -> Option<Batch> {
        let mut in_flight = self.in_flight.lock().ok()?;
        let batch = self.storage.read_next_batch(&in_flight)?;
        in_flight.insert(batch.file.clone());
        Some(batch)
    }

    fn release(&self, file: &Path) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(file);
        }
    }

    fn handle_batch(&self, batch: &Batch, report: &mut UploadRunReport) -> TickEnd {
        if batch.records.is_empty() {
            self.logger.log(
                LogLevel::Warn,
                LogTarget::Maintainer,
                &format!("{}: dropping empty batch {}", self.feature(), batch.file.display()),
            );
            if self.storage.delete_batch(&batch.file, RemovalReason::Invalid) {
                report.deleted += 1;
            }
            return TickEnd::Deleted;
        }

        report.attempted += 1;
        let status = self.uploader.upload(batch);
        match self.retention.decide(&batch.file, &status) {
            RetentionDecision::Delete(reason) => {
                if self.storage.delete_batch(&batch.file, reason) {
                    report.deleted += 1;
                }
                TickEnd::Deleted
            }
            RetentionDecision::Retain => {
                report.retained += 1;
                TickEnd::Retained
            }
        }
    }

    fn adjust_delay(&self, end: TickEnd) -> u64 {
        let current = self.current_delay_ms() as f64;
        let next = match end {
            TickEnd::Deleted => {
                ((current * DECREASE_FACTOR) as u64).max(self.config.min_delay_ms)
            }
            TickEnd::Retained | TickEnd::Idle => {
                ((current * INCREASE_FACTOR) as u64).min(self.config.max_delay_ms)
            }
        };
        self.current_delay_ms.store(next, Ordering::SeqCst);
        next
    }
}
