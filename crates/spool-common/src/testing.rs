//! Test doubles shared by the spool crates.
//!
//! Enabled for this crate's own tests and, for downstream crates, through the
//! `test-utils` feature.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::logger::{InternalLogger, LogLevel, LogTarget};
use crate::time::TimeProvider;

/// Manually driven clock.
#[derive(Debug)]
pub struct FakeTimeProvider {
    now_ms: AtomicI64,
}

impl FakeTimeProvider {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeProvider for FakeTimeProvider {
    fn device_timestamp_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub target: LogTarget,
    pub message: String,
}

/// One captured metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEntry {
    pub name: String,
    pub attributes: serde_json::Value,
}

/// Logger capturing everything for later assertions.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    logs: Mutex<Vec<LogEntry>>,
    metrics: Mutex<Vec<MetricEntry>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.logs.lock().unwrap().clone()
    }

    pub fn metrics(&self) -> Vec<MetricEntry> {
        self.metrics.lock().unwrap().clone()
    }

    /// Whether some entry at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    pub fn count_at(&self, level: LogLevel) -> usize {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == level)
            .count()
    }
}

impl InternalLogger for RecordingLogger {
    fn log(&self, level: LogLevel, target: LogTarget, message: &str) {
        self.logs.lock().unwrap().push(LogEntry {
            level,
            target,
            message: message.to_string(),
        });
    }

    fn log_metric(&self, name: &str, attributes: &serde_json::Value) {
        self.metrics.lock().unwrap().push(MetricEntry {
            name: name.to_string(),
            attributes: attributes.clone(),
        });
    }
}
