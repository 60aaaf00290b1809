//! Per-feature storage façade.
//!
//! Producers call [`FeatureStorage::write_event`], which only queues a task;
//! the upload side reads and deletes sealed batches synchronously.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use spool_common::{InternalLogger, LogLevel, LogTarget};
use spool_config::FilePersistenceConfig;

use crate::executor::PersistenceExecutor;
use crate::file_ops;
use crate::metrics::{MetricsDispatcher, RemovalReason};
use crate::mover::FileMover;
use crate::orchestrator::FileOrchestrator;
use crate::store::BatchStore;

/// A sealed batch loaded for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub file: PathBuf,
    pub records: Vec<Vec<u8>>,
    /// Feature-provided metadata sidecar, if any.
    pub metadata: Option<Vec<u8>>,
}

pub struct FeatureStorage {
    feature: String,
    executor: Arc<PersistenceExecutor>,
    orchestrator: Arc<dyn FileOrchestrator>,
    store: Arc<dyn BatchStore>,
    mover: FileMover,
    metrics: Arc<dyn MetricsDispatcher>,
    config: FilePersistenceConfig,
    logger: Arc<dyn InternalLogger>,
}

impl FeatureStorage {
    pub fn new(
        feature: impl Into<String>,
        executor: Arc<PersistenceExecutor>,
        orchestrator: Arc<dyn FileOrchestrator>,
        store: Arc<dyn BatchStore>,
        metrics: Arc<dyn MetricsDispatcher>,
        config: FilePersistenceConfig,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            feature: feature.into(),
            executor,
            orchestrator,
            store,
            mover: FileMover::new(logger.clone()),
            metrics,
            config,
            logger,
        }
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn orchestrator(&self) -> &Arc<dyn FileOrchestrator> {
        &self.orchestrator
    }

    /// Queue one serialized event for persistence.
    pub fn write_event(&self, data: Vec<u8>, batch_metadata: Option<Vec<u8>>) {
        let feature = self.feature.clone();
        let orchestrator = self.orchestrator.clone();
        let store = self.store.clone();
        let logger = self.logger.clone();
        let max_item_size = self.config.max_item_size;
        self.executor
            .submit(format!("{}: write event", self.feature), move || {
                persist_event(
                    &feature,
                    orchestrator.as_ref(),
                    store.as_ref(),
                    logger.as_ref(),
                    max_item_size,
                    &data,
                    batch_metadata.as_deref(),
                );
            });
    }

    /// Oldest sealed batch not already being handled.
    pub fn read_next_batch(&self, exclude: &HashSet<PathBuf>) -> Option<Batch> {
        let file = self.orchestrator.get_readable_file(exclude)?;
        Some(self.read_batch(&file))
    }

    pub fn read_batch(&self, file: &Path) -> Batch {
        let records = self.store.read(file);
        let metadata = self
            .orchestrator
            .get_metadata_file(file)
            .filter(|sidecar| file_ops::exists_safe(sidecar, self.logger.as_ref()))
            .and_then(|sidecar| self.store.read_raw(&sidecar));
        Batch {
            file: file.to_path_buf(),
            records,
            metadata,
        }
    }

    /// Every batch of the granted root, oldest first.
    pub fn flushable_batches(&self) -> Vec<PathBuf> {
        self.orchestrator.get_flushable_files()
    }

    /// Delete a batch and its sidecar, reporting `reason`.
    pub fn delete_batch(&self, file: &Path, reason: RemovalReason) -> bool {
        if !self.mover.delete(file) {
            self.logger.log(
                LogLevel::Warn,
                LogTarget::Maintainer,
                &format!("unable to delete batch {} ({})", file.display(), reason),
            );
            return false;
        }
        let pending = self.orchestrator.decrement_pending_files();
        self.metrics.send_batch_deleted_metric(file, reason, pending);

        if let Some(sidecar) = self.orchestrator.get_metadata_file(file) {
            self.mover.delete(&sidecar);
        }
        true
    }

    /// Close the current batch so the next write starts a new one.
    pub fn request_new_batch(&self) {
        let orchestrator = self.orchestrator.clone();
        self.executor
            .submit(format!("{}: new batch", self.feature), move || {
                orchestrator.request_new_batch()
            });
    }

    /// Queue deletion of every batch of the feature, in every root.
    pub fn drop_all(&self) {
        let orchestrator = self.orchestrator.clone();
        let mover = self.mover.clone();
        self.executor
            .submit(format!("{}: drop all", self.feature), move || {
                for file in orchestrator.get_all_files() {
                    mover.delete(&file);
                    if let Some(sidecar) = orchestrator.get_metadata_file(&file) {
                        mover.delete(&sidecar);
                    }
                }
            });
    }
}

fn persist_event(
    feature: &str,
    orchestrator: &dyn FileOrchestrator,
    store: &dyn BatchStore,
    logger: &dyn InternalLogger,
    max_item_size: u64,
    data: &[u8],
    batch_metadata: Option<&[u8]>,
) -> bool {
    let size = data.len() as u64;
    if size > max_item_size {
        logger.log(
            LogLevel::Error,
            LogTarget::User,
            &format!(
                "{}: event of {} bytes exceeds the {} byte limit, dropped",
                feature, size, max_item_size
            ),
        );
        return false;
    }

    let Some(file) = orchestrator.get_writable_file(size) else {
        logger.log(
            LogLevel::Debug,
            LogTarget::Maintainer,
            &format!("{}: no writable batch, event dropped", feature),
        );
        return false;
    };
    if !store.write(&file, data, true) {
        return false;
    }

    if let Some(metadata) = batch_metadata {
        if let Some(sidecar) = orchestrator.get_metadata_file(&file) {
            store.write_raw(&sidecar, metadata, false);
        }
    }
    true
}
