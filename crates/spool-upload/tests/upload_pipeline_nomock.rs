//! No-mock integration tests for the upload pipeline.
//!
//! These tests drive real batch files through the real HTTP uploader against
//! a loopback intake and validate:
//! - Accepted batches are deleted and the payload is the framed record list
//! - Server errors retain the batch, which is retried on the next tick
//! - Client errors discard the batch
//! - Retained batches past the retry budget are purged
//! - An unreachable intake never loses data within the budget

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use spool_common::testing::{FakeTimeProvider, RecordingLogger};
use spool_common::InternalLogger;
use spool_config::{
    BackPressureMitigation, FilePersistenceConfig, IntakeConfig, RetentionConfig,
    UploadConfiguration,
};
use spool_store::{
    BackPressureStrategy, BatchFileOrchestrator, FeatureStorage, NoOpMetricsDispatcher,
    PersistenceExecutor, PlainBatchStore,
};
use spool_upload::{HttpUploader, RetentionPolicy, UploadScheduler};
use tempfile::TempDir;

const T0: i64 = 1_700_000_000_000;
const RETRY_BUDGET_MS: u64 = 3_600_000;

// ============================================================================
// Test Helpers
// ============================================================================

/// Loopback intake answering each request with the next scripted status.
struct Intake {
    url: String,
    bodies: Arc<Mutex<Vec<String>>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Intake {
    fn start(statuses: Vec<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api/v2/logs", listener.local_addr().unwrap());
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let recorded = bodies.clone();
        let thread = thread::spawn(move || {
            for status in statuses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = v.trim().parse().unwrap();
                    }
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).unwrap();
                recorded
                    .lock()
                    .unwrap()
                    .push(String::from_utf8(body).unwrap());
                let mut stream = reader.into_inner();
                write!(
                    stream,
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                )
                .unwrap();
            }
        });
        Intake {
            url,
            bodies,
            thread: Some(thread),
        }
    }

    fn bodies(&mut self) -> Vec<String> {
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
        self.bodies.lock().unwrap().clone()
    }
}

struct Pipeline {
    _temp: TempDir,
    clock: Arc<FakeTimeProvider>,
    executor: Arc<PersistenceExecutor>,
    storage: Arc<FeatureStorage>,
    scheduler: UploadScheduler,
}

fn pipeline(endpoint: &str) -> Pipeline {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(FakeTimeProvider::new(T0));
    let logger: Arc<dyn InternalLogger> = Arc::new(RecordingLogger::new());
    let mut config = FilePersistenceConfig::default();
    config.max_items_per_batch = 2;

    let executor = Arc::new(PersistenceExecutor::new(
        "spool-upload-test",
        BackPressureStrategy::new(256, BackPressureMitigation::IgnoreNewest),
        logger.clone(),
    ));
    let storage = Arc::new(FeatureStorage::new(
        "logs",
        executor.clone(),
        Arc::new(BatchFileOrchestrator::new(
            temp.path().join("logs-v2"),
            config,
            Arc::new(NoOpMetricsDispatcher),
            clock.clone(),
            logger.clone(),
        )),
        Arc::new(PlainBatchStore::new(logger.clone())),
        Arc::new(NoOpMetricsDispatcher),
        config,
        logger.clone(),
    ));
    let intake = IntakeConfig {
        endpoint: Some(endpoint.to_string()),
        timeout_ms: 5_000,
        ..IntakeConfig::default()
    };
    let uploader = Arc::new(HttpUploader::new("logs", intake, logger.clone()).unwrap());
    let scheduler = UploadScheduler::new(
        storage.clone(),
        uploader,
        RetentionPolicy::new(
            RetentionConfig {
                max_retry_age_ms: RETRY_BUDGET_MS,
            },
            clock.clone(),
        ),
        UploadConfiguration::default(),
        logger,
    );
    Pipeline {
        _temp: temp,
        clock,
        executor,
        storage,
        scheduler,
    }
}

impl Pipeline {
    fn write_and_seal(&self, events: &[&str]) {
        for event in events {
            self.storage.write_event(event.as_bytes().to_vec(), None);
        }
        assert!(self.executor.wait_to_idle(Duration::from_secs(5)));
        self.clock.advance(60_000);
    }
}

// ============================================================================
// Upload Pipeline
// ============================================================================

#[test]
fn accepted_batches_are_deleted() {
    let mut intake = Intake::start(vec!["202 Accepted", "202 Accepted"]);
    let p = pipeline(&intake.url);
    p.write_and_seal(&[r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":3}"#]);

    let report = p.scheduler.run_once();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.deleted, 2);
    assert!(p.storage.flushable_batches().is_empty());
    assert_eq!(
        intake.bodies(),
        vec![r#"[{"n":1},{"n":2}]"#.to_string(), r#"[{"n":3}]"#.to_string()]
    );
}

#[test]
fn server_error_retains_until_next_tick() {
    let mut intake = Intake::start(vec!["500 Internal Server Error", "200 OK"]);
    let p = pipeline(&intake.url);
    p.write_and_seal(&["a"]);

    let first = p.scheduler.run_once();
    assert_eq!(first.retained, 1);
    assert_eq!(p.storage.flushable_batches().len(), 1);

    let second = p.scheduler.run_once();
    assert_eq!(second.deleted, 1);
    assert!(p.storage.flushable_batches().is_empty());
    assert_eq!(intake.bodies(), vec!["[a]".to_string(), "[a]".to_string()]);
}

#[test]
fn client_error_discards_batch() {
    let mut intake = Intake::start(vec!["400 Bad Request"]);
    let p = pipeline(&intake.url);
    p.write_and_seal(&["malformed"]);

    let report = p.scheduler.run_once();

    assert_eq!(report.deleted, 1);
    assert!(p.storage.flushable_batches().is_empty());
    assert_eq!(intake.bodies().len(), 1);
}

#[test]
fn retained_batch_is_purged_past_budget() {
    let mut intake = Intake::start(vec!["503 Service Unavailable", "503 Service Unavailable"]);
    let p = pipeline(&intake.url);
    p.write_and_seal(&["late"]);

    assert_eq!(p.scheduler.run_once().retained, 1);
    p.clock.advance(RETRY_BUDGET_MS as i64);

    let report = p.scheduler.run_once();
    assert_eq!(report.deleted, 1);
    assert!(p.storage.flushable_batches().is_empty());
    assert_eq!(intake.bodies().len(), 2);
}

#[test]
fn unreachable_intake_keeps_data() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let p = pipeline(&format!("http://127.0.0.1:{}/api/v2/logs", port));
    p.write_and_seal(&["x", "y", "z"]);

    for _ in 0..3 {
        let report = p.scheduler.run_once();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.retained, 1);
    }
    assert_eq!(p.storage.flushable_batches().len(), 2);
    assert!(p.scheduler.current_delay_ms() > UploadConfiguration::default().default_delay_ms);
}
