//! Batch lifecycle telemetry.
//!
//! Two events are reported, both sampled:
//! - **batch deleted**: age of the batch, why it was removed, the uploader
//!   delay window and whether the host application was in background
//! - **batch closed**: how long the batch stayed open and how many events it
//!   received before rotation
//!
//! `Flushed` removals are never reported. They happen during graceful exit
//! and say nothing about delivery health.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use spool_common::{
    AppLifecycleEvent, InternalLogger, LifecycleListener, LogLevel, LogTarget, TimeProvider,
};
use spool_config::{FilePersistenceConfig, UploadConfiguration};

use crate::orchestrator::batch_file_timestamp;

pub const BATCH_DELETED_METRIC: &str = "[Spool Metric] Batch Deleted";
pub const BATCH_CLOSED_METRIC: &str = "[Spool Metric] Batch Closed";

/// Why a batch left the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Intake answered with this HTTP status.
    IntakeCode(u16),
    /// Permanently rejected payload.
    Invalid,
    /// Retry budget exhausted, or evicted to respect the disk budget.
    Purged,
    /// Older than the obsolete threshold.
    Obsolete,
    /// Uploaded during graceful exit.
    Flushed,
}

impl RemovalReason {
    pub fn includes_in_metrics(&self) -> bool {
        !matches!(self, RemovalReason::Flushed)
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalReason::IntakeCode(code) => write!(f, "intake-code-{}", code),
            RemovalReason::Invalid => write!(f, "invalid"),
            RemovalReason::Purged => write!(f, "purged"),
            RemovalReason::Obsolete => write!(f, "obsolete"),
            RemovalReason::Flushed => write!(f, "flushed"),
        }
    }
}

/// Write history of a batch, tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchMetadata {
    pub last_time_used_ms: i64,
    pub forced_new: bool,
    pub events_count: u64,
}

/// Receives batch lifecycle transitions.
pub trait MetricsDispatcher: Send + Sync {
    fn send_batch_deleted_metric(&self, batch_file: &Path, reason: RemovalReason, pending_batches: i64);
    fn send_batch_closed_metric(&self, batch_file: &Path, metadata: BatchMetadata);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsDispatcher;

impl MetricsDispatcher for NoOpMetricsDispatcher {
    fn send_batch_deleted_metric(&self, _: &Path, _: RemovalReason, _: i64) {}
    fn send_batch_closed_metric(&self, _: &Path, _: BatchMetadata) {}
}

/// Decides whether one metric occurrence is reported.
pub trait Sampler: Send + Sync {
    fn sample(&self) -> bool;

    /// Rate in percent.
    fn sample_rate(&self) -> f32;
}

/// Samples uniformly at a fixed percentage.
#[derive(Debug, Clone, Copy)]
pub struct RateBasedSampler {
    rate: f32,
}

impl RateBasedSampler {
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.clamp(0.0, 100.0),
        }
    }
}

impl Sampler for RateBasedSampler {
    fn sample(&self) -> bool {
        if self.rate <= 0.0 {
            return false;
        }
        if self.rate >= 100.0 {
            return true;
        }
        rand::random::<f32>() * 100.0 < self.rate
    }

    fn sample_rate(&self) -> f32 {
        self.rate
    }
}

/// Short track name reported for a feature.
pub fn track_name(feature: &str) -> &str {
    match feature {
        "rum" => "rum",
        "logs" => "logs",
        "tracing" => "trace",
        "session-replay" => "sr",
        "session-replay-resources" => "sr-resources",
        other => other,
    }
}

/// Reports batch lifecycle metrics for one feature through the internal logger.
pub struct BatchMetricsDispatcher {
    track: String,
    upload: UploadConfiguration,
    persistence: FilePersistenceConfig,
    sampler: Arc<dyn Sampler>,
    time: Arc<dyn TimeProvider>,
    logger: Arc<dyn InternalLogger>,
    in_background: AtomicBool,
}

impl BatchMetricsDispatcher {
    pub fn new(
        feature: &str,
        upload: UploadConfiguration,
        persistence: FilePersistenceConfig,
        sampler: Arc<dyn Sampler>,
        time: Arc<dyn TimeProvider>,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            track: track_name(feature).to_string(),
            upload,
            persistence,
            sampler,
            time,
            logger,
            in_background: AtomicBool::new(false),
        }
    }

    pub fn is_in_background(&self) -> bool {
        self.in_background.load(Ordering::Relaxed)
    }

    fn creation_timestamp(&self, batch_file: &Path) -> Option<i64> {
        let ts = batch_file_timestamp(batch_file);
        if ts.is_none() {
            self.logger.log(
                LogLevel::Error,
                LogTarget::Maintainer,
                &format!(
                    "unable to parse batch creation time from {}",
                    batch_file.display()
                ),
            );
        }
        ts
    }
}

impl MetricsDispatcher for BatchMetricsDispatcher {
    fn send_batch_deleted_metric(&self, batch_file: &Path, reason: RemovalReason, pending_batches: i64) {
        if !reason.includes_in_metrics() {
            return;
        }
        let Some(created) = self.creation_timestamp(batch_file) else {
            return;
        };
        if !self.sampler.sample() {
            return;
        }
        let age = self.time.device_timestamp_millis() - created;
        let attributes = json!({
            "track": self.track,
            "metric_type": "batch deleted",
            "batch_age_ms": age,
            "uploader_delay": {
                "min": self.upload.min_delay_ms,
                "max": self.upload.max_delay_ms,
            },
            "uploader_window_ms": self.persistence.recent_delay_ms,
            "removal_reason": reason.to_string(),
            "in_background": self.is_in_background(),
            "pending_batches": pending_batches,
        });
        self.logger.log_metric(BATCH_DELETED_METRIC, &attributes);
    }

    fn send_batch_closed_metric(&self, batch_file: &Path, metadata: BatchMetadata) {
        let Some(created) = self.creation_timestamp(batch_file) else {
            return;
        };
        if !self.sampler.sample() {
            return;
        }
        let attributes = json!({
            "track": self.track,
            "metric_type": "batch closed",
            "batch_duration_ms": metadata.last_time_used_ms - created,
            "uploader_window_ms": self.persistence.recent_delay_ms,
            "batch_events_count": metadata.events_count,
            "forced_new": metadata.forced_new,
        });
        self.logger.log_metric(BATCH_CLOSED_METRIC, &attributes);
    }
}

impl LifecycleListener for BatchMetricsDispatcher {
    fn on_lifecycle_event(&self, event: AppLifecycleEvent) {
        match event {
            AppLifecycleEvent::Background => self.in_background.store(true, Ordering::Relaxed),
            AppLifecycleEvent::Foreground => self.in_background.store(false, Ordering::Relaxed),
            AppLifecycleEvent::Terminated => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_common::testing::{FakeTimeProvider, RecordingLogger};
    use std::path::PathBuf;

    struct Always(bool);

    impl Sampler for Always {
        fn sample(&self) -> bool {
            self.0
        }
        fn sample_rate(&self) -> f32 {
            if self.0 {
                100.0
            } else {
                0.0
            }
        }
    }

    fn dispatcher(feature: &str, sample: bool) -> (BatchMetricsDispatcher, Arc<RecordingLogger>) {
        let logger = Arc::new(RecordingLogger::new());
        let dispatcher = BatchMetricsDispatcher::new(
            feature,
            UploadConfiguration::default(),
            FilePersistenceConfig::default(),
            Arc::new(Always(sample)),
            Arc::new(FakeTimeProvider::new(1_700_000_005_000)),
            logger.clone(),
        );
        (dispatcher, logger)
    }

    #[test]
    fn removal_reason_names() {
        assert_eq!(RemovalReason::IntakeCode(202).to_string(), "intake-code-202");
        assert_eq!(RemovalReason::Invalid.to_string(), "invalid");
        assert_eq!(RemovalReason::Purged.to_string(), "purged");
        assert_eq!(RemovalReason::Obsolete.to_string(), "obsolete");
        assert_eq!(RemovalReason::Flushed.to_string(), "flushed");
        assert!(!RemovalReason::Flushed.includes_in_metrics());
        assert!(RemovalReason::Obsolete.includes_in_metrics());
    }

    #[test]
    fn track_names() {
        assert_eq!(track_name("tracing"), "trace");
        assert_eq!(track_name("session-replay"), "sr");
        assert_eq!(track_name("session-replay-resources"), "sr-resources");
        assert_eq!(track_name("crash"), "crash");
    }

    #[test]
    fn deleted_metric_reports_age_from_file_name() {
        let (dispatcher, logger) = dispatcher("tracing", true);
        dispatcher.send_batch_deleted_metric(
            &PathBuf::from("/data/tracing-v2/1700000000000"),
            RemovalReason::IntakeCode(202),
            3,
        );

        let metrics = logger.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, BATCH_DELETED_METRIC);
        let attrs = &metrics[0].attributes;
        assert_eq!(attrs["track"], "trace");
        assert_eq!(attrs["batch_age_ms"], 5000);
        assert_eq!(attrs["removal_reason"], "intake-code-202");
        assert_eq!(attrs["uploader_delay"]["min"], 2000);
        assert_eq!(attrs["uploader_delay"]["max"], 20000);
        assert_eq!(attrs["uploader_window_ms"], 15000);
        assert_eq!(attrs["in_background"], false);
        assert_eq!(attrs["pending_batches"], 3);
    }

    #[test]
    fn flushed_batches_are_not_reported() {
        let (dispatcher, logger) = dispatcher("logs", true);
        dispatcher.send_batch_deleted_metric(
            &PathBuf::from("1700000000000"),
            RemovalReason::Flushed,
            0,
        );
        assert!(logger.metrics().is_empty());
    }

    #[test]
    fn unparsable_name_logs_and_skips() {
        let (dispatcher, logger) = dispatcher("logs", true);
        dispatcher.send_batch_deleted_metric(&PathBuf::from("not-a-ts"), RemovalReason::Purged, 0);
        assert!(logger.metrics().is_empty());
        assert!(logger.contains(LogLevel::Error, "unable to parse batch creation time"));
    }

    #[test]
    fn unsampled_metrics_are_dropped() {
        let (dispatcher, logger) = dispatcher("logs", false);
        dispatcher.send_batch_deleted_metric(&PathBuf::from("1700000000000"), RemovalReason::Purged, 0);
        assert!(logger.metrics().is_empty());
    }

    #[test]
    fn closed_metric_reports_duration() {
        let (dispatcher, logger) = dispatcher("rum", true);
        dispatcher.send_batch_closed_metric(
            &PathBuf::from("1700000000000"),
            BatchMetadata {
                last_time_used_ms: 1_700_000_003_500,
                forced_new: true,
                events_count: 12,
            },
        );

        let metrics = logger.metrics();
        assert_eq!(metrics[0].name, BATCH_CLOSED_METRIC);
        let attrs = &metrics[0].attributes;
        assert_eq!(attrs["batch_duration_ms"], 3500);
        assert_eq!(attrs["batch_events_count"], 12);
        assert_eq!(attrs["forced_new"], true);
        assert_eq!(attrs["metric_type"], "batch closed");
    }

    #[test]
    fn lifecycle_toggles_background_flag() {
        let (dispatcher, logger) = dispatcher("logs", true);
        dispatcher.on_lifecycle_event(AppLifecycleEvent::Background);
        dispatcher.send_batch_deleted_metric(&PathBuf::from("1700000000000"), RemovalReason::Invalid, 0);
        dispatcher.on_lifecycle_event(AppLifecycleEvent::Foreground);
        dispatcher.send_batch_deleted_metric(&PathBuf::from("1700000000000"), RemovalReason::Invalid, 0);

        let metrics = logger.metrics();
        assert_eq!(metrics[0].attributes["in_background"], true);
        assert_eq!(metrics[1].attributes["in_background"], false);
    }

    #[test]
    fn sampler_bounds() {
        assert!(RateBasedSampler::new(100.0).sample());
        assert!(!RateBasedSampler::new(0.0).sample());
        assert_eq!(RateBasedSampler::new(250.0).sample_rate(), 100.0);
        let sampled = (0..1000).filter(|_| RateBasedSampler::new(50.0).sample()).count();
        assert!((300..700).contains(&sampled));
    }
}
