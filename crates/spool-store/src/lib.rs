//! Event spool persistence.
//!
//! This crate turns a stream of serialized events into sealed batch files:
//! - [`BackPressuredQueue`] and [`PersistenceExecutor`] absorb writes without
//!   blocking producers and serialize all disk I/O on one worker
//! - [`BatchFileOrchestrator`] picks, rotates and cleans up batch files
//! - [`ConsentAwareFileOrchestrator`] routes writes by tracking consent
//! - [`BatchStore`] frames, encrypts and reads records
//! - [`BatchMetricsDispatcher`] reports sampled batch lifecycle metrics
//! - [`FeatureStorage`] ties the above together for one feature

pub mod consent;
pub mod executor;
pub mod file_ops;
pub mod metrics;
pub mod mover;
pub mod orchestrator;
pub mod queue;
pub mod record;
pub mod storage;
pub mod store;

pub use consent::{
    granted_dir_name, pending_dir_name, ConsentAwareFileMigrator, ConsentAwareFileOrchestrator,
    MigrationOperation,
};
pub use executor::{PersistenceExecutor, PersistenceTask, ShutdownReport};
pub use metrics::{
    track_name, BatchMetadata, BatchMetricsDispatcher, MetricsDispatcher, NoOpMetricsDispatcher,
    RateBasedSampler, RemovalReason, Sampler,
};
pub use mover::FileMover;
pub use orchestrator::{
    batch_file_timestamp, is_batch_file, BatchFileOrchestrator, FileOrchestrator,
    NoOpFileOrchestrator,
};
pub use queue::{BackPressureStrategy, BackPressuredQueue};
pub use record::{decode_records, encode_record, DecodeIssue, DecodedRecords, EventMeta};
pub use storage::{Batch, FeatureStorage};
pub use store::{create_batch_store, BatchStore, EncryptedBatchStore, Encryption, PlainBatchStore};
