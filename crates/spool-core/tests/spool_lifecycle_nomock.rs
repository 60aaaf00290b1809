//! No-mock integration tests for the wired spool.
//!
//! These tests validate:
//! - Consent changes fan out to every registered feature
//! - Stopping drains queued writes to disk under `DrainToStorage`
//! - `Terminated` on the lifecycle channel flushes and stops the spool
//! - Foreground/background transitions reach the metrics dispatchers
//! - Writes racing a flush are rejected with a log, never silently deleted
//! - Registration rejects duplicates, bad names and stopped spools

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use spool_common::testing::RecordingLogger;
use spool_common::{AppLifecycleEvent, ConsentState, LogLevel};
use spool_config::SpoolConfig;
use spool_core::{Spool, SpoolOptions};
use spool_store::{Batch, FeatureStorage};
use spool_upload::{DataUploader, UploadStatus};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct RecordingUploader {
    records: Mutex<Vec<Vec<u8>>>,
}

impl DataUploader for RecordingUploader {
    fn upload(&self, batch: &Batch) -> UploadStatus {
        self.records
            .lock()
            .unwrap()
            .extend(batch.records.iter().cloned());
        UploadStatus::from_status_code(202)
    }
}

/// Writes another event into its own feature during the first upload.
#[derive(Default)]
struct InterleavingUploader {
    storage: OnceLock<Arc<FeatureStorage>>,
    records: Mutex<Vec<Vec<u8>>>,
}

impl DataUploader for InterleavingUploader {
    fn upload(&self, batch: &Batch) -> UploadStatus {
        let first = {
            let mut records = self.records.lock().unwrap();
            let first = records.is_empty();
            records.extend(batch.records.iter().cloned());
            first
        };
        if first {
            if let Some(storage) = self.storage.get() {
                storage.write_event(b"late-event".to_vec(), None);
                thread::sleep(Duration::from_millis(300));
            }
        }
        UploadStatus::from_status_code(202)
    }
}

fn config(storage: &Path) -> SpoolConfig {
    SpoolConfig {
        storage_dir: Some(storage.to_path_buf()),
        ..SpoolConfig::default()
    }
}

fn options(consent: ConsentState) -> (SpoolOptions, Arc<RecordingLogger>) {
    let logger = Arc::new(RecordingLogger::new());
    let options = SpoolOptions {
        logger: logger.clone(),
        initial_consent: consent,
        start_uploads: false,
        ..SpoolOptions::default()
    };
    (options, logger)
}

fn persisted_records(storage: &FeatureStorage) -> Vec<Vec<u8>> {
    storage
        .flushable_batches()
        .iter()
        .flat_map(|file| storage.read_batch(file).records)
        .collect()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// ============================================================================
// Wiring
// ============================================================================

#[test]
fn consent_grant_reaches_every_feature() {
    let temp = TempDir::new().unwrap();
    let (options, _logger) = options(ConsentState::Pending);
    let spool = Spool::new(config(temp.path()), options).unwrap();
    let logs = spool.register_feature("logs", None).unwrap();
    let rum = spool.register_feature("rum", None).unwrap();

    logs.storage().write_event(b"log".to_vec(), None);
    rum.storage().write_event(b"view".to_vec(), None);
    assert!(spool.wait_to_idle(Duration::from_secs(5)));
    assert!(persisted_records(logs.storage()).is_empty());

    spool.set_consent(ConsentState::Granted);
    assert!(spool.wait_to_idle(Duration::from_secs(5)));

    assert_eq!(persisted_records(logs.storage()), vec![b"log".to_vec()]);
    assert_eq!(persisted_records(rum.storage()), vec![b"view".to_vec()]);
    spool.stop();
}

#[test]
fn stop_drains_queued_writes() {
    let temp = TempDir::new().unwrap();
    let (options, _logger) = options(ConsentState::Granted);
    let spool = Spool::new(config(temp.path()), options).unwrap();
    let logs = spool.register_feature("logs", None).unwrap();

    for i in 0..100 {
        logs.storage()
            .write_event(format!("event-{}", i).into_bytes(), None);
    }
    let report = spool.stop();

    assert_eq!(report.dropped_tasks, 0);
    assert_eq!(persisted_records(logs.storage()).len(), 100);
    assert!(spool.is_stopped());
    assert_eq!(spool.stop().drained_tasks, 0);
}

#[test]
fn terminated_event_flushes_and_stops() {
    let temp = TempDir::new().unwrap();
    let (options, _logger) = options(ConsentState::Granted);
    let spool = Spool::new(config(temp.path()), options).unwrap();
    let uploader = Arc::new(RecordingUploader::default());
    let logs = spool.register_feature("logs", Some(uploader.clone())).unwrap();

    logs.storage().write_event(b"last words".to_vec(), None);
    spool
        .lifecycle_sender()
        .unwrap()
        .send(AppLifecycleEvent::Terminated)
        .unwrap();

    assert!(wait_until(|| spool.is_stopped()));
    assert_eq!(
        *uploader.records.lock().unwrap(),
        vec![b"last words".to_vec()]
    );
    assert!(logs.storage().flushable_batches().is_empty());
}

#[test]
fn write_during_flush_is_rejected_not_lost() {
    let temp = TempDir::new().unwrap();
    let (options, logger) = options(ConsentState::Granted);
    let spool = Spool::new(config(temp.path()), options).unwrap();
    let uploader = Arc::new(InterleavingUploader::default());
    let logs = spool.register_feature("logs", Some(uploader.clone())).unwrap();
    assert!(uploader.storage.set(logs.storage().clone()).is_ok());

    logs.storage().write_event(b"early-event".to_vec(), None);
    let report = spool.flush_and_stop();

    assert_eq!(report.flushed.len(), 1);
    assert_eq!(report.flushed[0].uploaded, 1);
    assert_eq!(*uploader.records.lock().unwrap(), vec![b"early-event".to_vec()]);
    assert!(logger.contains(LogLevel::Warn, "rejected"));
    assert!(logs.storage().flushable_batches().is_empty());
    assert!(spool.is_stopped());
}

#[test]
fn lifecycle_events_reach_metrics() {
    let temp = TempDir::new().unwrap();
    let (options, _logger) = options(ConsentState::Granted);
    let spool = Spool::new(config(temp.path()), options).unwrap();
    let logs = spool.register_feature("logs", None).unwrap();
    let sender = spool.lifecycle_sender().unwrap();

    sender.send(AppLifecycleEvent::Background).unwrap();
    assert!(wait_until(|| logs.metrics().is_in_background()));

    sender.send(AppLifecycleEvent::Foreground).unwrap();
    assert!(wait_until(|| !logs.metrics().is_in_background()));
    spool.stop();
}

#[test]
fn registration_is_validated() {
    let temp = TempDir::new().unwrap();
    let (options, _logger) = options(ConsentState::Granted);
    let spool = Spool::new(config(temp.path()), options).unwrap();

    spool.register_feature("logs", None).unwrap();
    assert!(spool.register_feature("logs", None).is_err());
    assert!(spool.register_feature("", None).is_err());
    assert!(spool.register_feature("../escape", None).is_err());
    assert!(spool.feature("logs").is_some());
    assert!(spool.feature("rum").is_none());

    spool.stop();
    assert!(spool.register_feature("rum", None).is_err());
}

#[test]
fn invalid_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut config = config(temp.path());
    config.backpressure.capacity = 0;
    let (options, _logger) = options(ConsentState::Granted);
    assert!(Spool::new(config, options).is_err());
}

#[test]
fn http_uploader_requires_endpoint() {
    let temp = TempDir::new().unwrap();
    let (options, _logger) = options(ConsentState::Granted);
    let spool = Spool::new(config(temp.path()), options).unwrap();
    assert!(spool.http_uploader("logs").is_err());
    spool.stop();
}
