//! Event spool configuration.
//!
//! This crate provides:
//! - Coarse presets (`BatchSize`, `UploadFrequency`, `BatchProcessingLevel`)
//! - The concrete thresholds derived from them
//! - The serializable [`SpoolConfig`] with semantic validation
//! - Deterministic config file resolution (CLI > env > XDG > defaults)

pub mod batch;
pub mod resolve;

pub use batch::{
    BatchProcessingLevel, BatchSize, FilePersistenceConfig, UploadConfiguration, UploadFrequency,
};
pub use resolve::{ConfigResolution, ConfigResolver, ConfigSource};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use spool_common::{Error, Result};

/// What the persistence queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackPressureMitigation {
    /// Evict the oldest queued item to make room for the new one.
    #[default]
    DropOldest,
    /// Discard the incoming item and keep the queue as is.
    IgnoreNewest,
}

/// What happens to queued writes still pending when the shutdown wait times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run the leftover tasks synchronously on the stopping thread.
    #[default]
    DrainToStorage,
    /// Discard the leftover tasks.
    Drop,
}

/// Persistence queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackPressureConfig {
    pub capacity: usize,
    pub mitigation: BackPressureMitigation,
}

impl BackPressureConfig {
    pub const DEFAULT_CAPACITY: usize = 1024;
}

impl Default for BackPressureConfig {
    fn default() -> Self {
        BackPressureConfig {
            capacity: Self::DEFAULT_CAPACITY,
            mitigation: BackPressureMitigation::default(),
        }
    }
}

/// Optional overrides for the thresholds derived from [`BatchSize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_item_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items_per_batch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_file_threshold_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_disk_space: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_frequency_ms: Option<u64>,
}

/// Upload retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// A batch that fails a retryable upload while older than this is purged.
    pub max_retry_age_ms: u64,
}

impl RetentionConfig {
    pub const DEFAULT_MAX_RETRY_AGE_MS: u64 = 12 * 60 * 60 * 1000;
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            max_retry_age_ms: Self::DEFAULT_MAX_RETRY_AGE_MS,
        }
    }
}

/// Batch lifecycle metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Sampling rate in percent (0-100).
    pub sample_rate: f32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig { sample_rate: 1.5 }
    }
}

/// Remote intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub prefix: String,
    pub separator: String,
    pub suffix: String,
    pub content_type: String,
    pub timeout_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        IntakeConfig {
            endpoint: None,
            prefix: "[".to_string(),
            separator: ",".to_string(),
            suffix: "]".to_string(),
            content_type: "application/json".to_string(),
            timeout_ms: 45_000,
        }
    }
}

/// Graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub wait_timeout_ms: u64,
    pub policy: ShutdownPolicy,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            wait_timeout_ms: 5_000,
            policy: ShutdownPolicy::default(),
        }
    }
}

/// Complete spool configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Root under which each feature gets its own directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    pub batch_size: BatchSize,
    pub upload_frequency: UploadFrequency,
    pub batch_processing_level: BatchProcessingLevel,
    pub backpressure: BackPressureConfig,
    pub persistence: PersistenceOverrides,
    pub retention: RetentionConfig,
    pub metrics: MetricsConfig,
    pub intake: IntakeConfig,
    pub shutdown: ShutdownConfig,
}

impl SpoolConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: SpoolConfig = serde_json::from_str(content)?;
        Ok(config)
    }

    /// Storage root, falling back to the platform's local data directory.
    pub fn resolved_storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(default_storage_dir)
    }

    /// Orchestrator thresholds after applying overrides.
    pub fn file_persistence_config(&self) -> FilePersistenceConfig {
        let base = FilePersistenceConfig::for_batch_size(self.batch_size);
        let o = &self.persistence;
        FilePersistenceConfig {
            recent_delay_ms: base.recent_delay_ms,
            max_batch_size: o.max_batch_size.unwrap_or(base.max_batch_size),
            max_item_size: o.max_item_size.unwrap_or(base.max_item_size),
            max_items_per_batch: o.max_items_per_batch.unwrap_or(base.max_items_per_batch),
            old_file_threshold_ms: o.old_file_threshold_ms.unwrap_or(base.old_file_threshold_ms),
            max_disk_space: o.max_disk_space.unwrap_or(base.max_disk_space),
            cleanup_frequency_ms: o.cleanup_frequency_ms.unwrap_or(base.cleanup_frequency_ms),
        }
    }

    pub fn upload_configuration(&self) -> UploadConfiguration {
        UploadConfiguration::new(self.upload_frequency, self.batch_processing_level)
    }

    /// Semantic validation.
    pub fn validate(&self) -> Result<()> {
        if self.backpressure.capacity == 0 {
            return Err(Error::Config(
                "backpressure.capacity must be at least 1".to_string(),
            ));
        }

        let rate = self.metrics.sample_rate;
        if !(0.0..=100.0).contains(&rate) || rate.is_nan() {
            return Err(Error::Config(format!(
                "metrics.sample_rate must be within [0, 100], got {}",
                rate
            )));
        }

        let persistence = self.file_persistence_config();
        if persistence.max_batch_size == 0
            || persistence.max_item_size == 0
            || persistence.max_items_per_batch == 0
        {
            return Err(Error::Config(
                "persistence batch limits must be non-zero".to_string(),
            ));
        }
        if persistence.max_item_size > persistence.max_batch_size {
            return Err(Error::Config(format!(
                "persistence.max_item_size ({}) exceeds max_batch_size ({})",
                persistence.max_item_size, persistence.max_batch_size
            )));
        }

        if self.retention.max_retry_age_ms > persistence.old_file_threshold_ms {
            return Err(Error::Config(format!(
                "retention.max_retry_age_ms ({}) exceeds the obsolete threshold ({})",
                self.retention.max_retry_age_ms, persistence.old_file_threshold_ms
            )));
        }

        if let Some(endpoint) = &self.intake.endpoint {
            if endpoint.trim().is_empty() {
                return Err(Error::Config("intake.endpoint is empty".to_string()));
            }
        }

        Ok(())
    }

    /// Intake endpoint, required by upload-capable callers.
    pub fn require_endpoint(&self) -> Result<&str> {
        self.intake
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| Error::Config("intake.endpoint is not configured".to_string()))
    }
}

/// Default storage root under the platform's local data directory.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("event_spool")
        .join("storage")
}
