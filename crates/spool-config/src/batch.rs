//! Batch sizing and upload cadence presets.
//!
//! The presets map coarse, user-facing knobs onto the concrete thresholds the
//! orchestrator and upload scheduler work with:
//!
//! | Preset                 | Value                                   |
//! |------------------------|-----------------------------------------|
//! | `BatchSize::Small`     | 5 s window, 1 MiB batch                 |
//! | `BatchSize::Medium`    | 15 s window, 4 MiB batch                |
//! | `BatchSize::Large`     | 60 s window, 10 MiB batch               |
//! | `UploadFrequency`      | base step 500 ms / 2 s / 5 s            |
//! | `BatchProcessingLevel` | 1 / 10 / 100 batches per upload tick    |

use serde::{Deserialize, Serialize};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Upload delay bounds as multiples of the frequency base step.
const MIN_DELAY_FACTOR: u64 = 1;
const DEFAULT_DELAY_FACTOR: u64 = 5;
const MAX_DELAY_FACTOR: u64 = 10;

/// Target batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl BatchSize {
    /// How long a batch stays open for writing.
    pub fn window_duration_ms(self) -> u64 {
        match self {
            BatchSize::Small => 5_000,
            BatchSize::Medium => 15_000,
            BatchSize::Large => 60_000,
        }
    }

    /// Byte threshold after which a batch is rotated.
    pub fn max_batch_size_bytes(self) -> u64 {
        match self {
            BatchSize::Small => MIB,
            BatchSize::Medium => 4 * MIB,
            BatchSize::Large => 10 * MIB,
        }
    }
}

/// How often uploads are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadFrequency {
    Frequent,
    #[default]
    Average,
    Rare,
}

impl UploadFrequency {
    pub fn base_step_ms(self) -> u64 {
        match self {
            UploadFrequency::Frequent => 500,
            UploadFrequency::Average => 2_000,
            UploadFrequency::Rare => 5_000,
        }
    }
}

/// How many batches a single upload tick may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchProcessingLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl BatchProcessingLevel {
    pub fn max_batches_per_upload_job(self) -> usize {
        match self {
            BatchProcessingLevel::Low => 1,
            BatchProcessingLevel::Medium => 10,
            BatchProcessingLevel::High => 100,
        }
    }
}

/// Concrete thresholds used by the file orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePersistenceConfig {
    /// Window during which the latest batch accepts writes.
    pub recent_delay_ms: u64,
    pub max_batch_size: u64,
    pub max_item_size: u64,
    pub max_items_per_batch: u64,
    /// Batches older than this are deleted as obsolete.
    pub old_file_threshold_ms: u64,
    /// Disk budget per storage root.
    pub max_disk_space: u64,
    /// Minimum time between two cleanups on the write path.
    pub cleanup_frequency_ms: u64,
}

impl FilePersistenceConfig {
    pub const DEFAULT_MAX_ITEM_SIZE: u64 = 512 * KIB;
    pub const DEFAULT_MAX_ITEMS_PER_BATCH: u64 = 500;
    pub const DEFAULT_OLD_FILE_THRESHOLD_MS: u64 = 18 * 60 * 60 * 1000;
    pub const DEFAULT_MAX_DISK_SPACE: u64 = 128 * MIB;
    pub const DEFAULT_CLEANUP_FREQUENCY_MS: u64 = 5_000;

    /// Thresholds for a batch size preset, other values at their defaults.
    pub fn for_batch_size(batch_size: BatchSize) -> Self {
        FilePersistenceConfig {
            recent_delay_ms: batch_size.window_duration_ms(),
            max_batch_size: batch_size.max_batch_size_bytes(),
            max_item_size: Self::DEFAULT_MAX_ITEM_SIZE,
            max_items_per_batch: Self::DEFAULT_MAX_ITEMS_PER_BATCH,
            old_file_threshold_ms: Self::DEFAULT_OLD_FILE_THRESHOLD_MS,
            max_disk_space: Self::DEFAULT_MAX_DISK_SPACE,
            cleanup_frequency_ms: Self::DEFAULT_CLEANUP_FREQUENCY_MS,
        }
    }
}

impl Default for FilePersistenceConfig {
    fn default() -> Self {
        Self::for_batch_size(BatchSize::default())
    }
}

/// Concrete upload cadence used by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfiguration {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub default_delay_ms: u64,
    pub max_batches_per_upload_job: usize,
}

impl UploadConfiguration {
    pub fn new(frequency: UploadFrequency, level: BatchProcessingLevel) -> Self {
        let step = frequency.base_step_ms();
        UploadConfiguration {
            min_delay_ms: MIN_DELAY_FACTOR * step,
            max_delay_ms: MAX_DELAY_FACTOR * step,
            default_delay_ms: DEFAULT_DELAY_FACTOR * step,
            max_batches_per_upload_job: level.max_batches_per_upload_job(),
        }
    }
}

impl Default for UploadConfiguration {
    fn default() -> Self {
        Self::new(UploadFrequency::default(), BatchProcessingLevel::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_presets() {
        assert_eq!(BatchSize::Small.window_duration_ms(), 5_000);
        assert_eq!(BatchSize::Large.window_duration_ms(), 60_000);
        assert_eq!(BatchSize::Medium.max_batch_size_bytes(), 4 * 1024 * 1024);
        assert!(BatchSize::Small.max_batch_size_bytes() < BatchSize::Large.max_batch_size_bytes());
    }

    #[test]
    fn upload_delays_scale_with_frequency() {
        let config = UploadConfiguration::new(UploadFrequency::Frequent, BatchProcessingLevel::Low);
        assert_eq!(config.min_delay_ms, 500);
        assert_eq!(config.default_delay_ms, 2_500);
        assert_eq!(config.max_delay_ms, 5_000);
        assert_eq!(config.max_batches_per_upload_job, 1);

        let rare = UploadConfiguration::new(UploadFrequency::Rare, BatchProcessingLevel::High);
        assert_eq!(rare.max_delay_ms, 50_000);
        assert_eq!(rare.max_batches_per_upload_job, 100);
    }

    #[test]
    fn persistence_defaults() {
        let config = FilePersistenceConfig::default();
        assert_eq!(config.recent_delay_ms, 15_000);
        assert_eq!(config.max_item_size, 512 * 1024);
        assert_eq!(config.max_items_per_batch, 500);
        assert_eq!(config.old_file_threshold_ms, 64_800_000);
        assert_eq!(config.max_disk_space, 128 * 1024 * 1024);
    }

    #[test]
    fn presets_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&BatchSize::Large).unwrap(), "\"large\"");
        let freq: UploadFrequency = serde_json::from_str("\"frequent\"").unwrap();
        assert_eq!(freq, UploadFrequency::Frequent);
    }
}
