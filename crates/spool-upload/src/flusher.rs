//! Synchronous flush for graceful exit.

use std::sync::Arc;

use serde::Serialize;
use spool_common::{InternalLogger, LogLevel, LogTarget};
use spool_store::{FeatureStorage, RemovalReason};

use crate::uploader::DataUploader;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub feature: String,
    pub uploaded: usize,
    pub failed: usize,
    pub deleted: usize,
}

/// Uploads every batch of a feature once, then deletes it regardless of the
/// outcome.
///
/// Includes the batch still open for writing. Only call this once the
/// persistence executor is shut down.
pub struct DataFlusher {
    storage: Arc<FeatureStorage>,
    uploader: Arc<dyn DataUploader>,
    logger: Arc<dyn InternalLogger>,
}

impl DataFlusher {
    pub fn new(
        storage: Arc<FeatureStorage>,
        uploader: Arc<dyn DataUploader>,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            storage,
            uploader,
            logger,
        }
    }

    pub fn flush(&self) -> FlushReport {
        let mut report = FlushReport {
            feature: self.storage.feature().to_string(),
            ..Default::default()
        };

        for file in self.storage.flushable_batches() {
            let batch = self.storage.read_batch(&file);
            if !batch.records.is_empty() {
                if self.uploader.upload(&batch).is_success() {
                    report.uploaded += 1;
                } else {
                    report.failed += 1;
                }
            }
            if self.storage.delete_batch(&file, RemovalReason::Flushed) {
                report.deleted += 1;
            }
        }

        if report.deleted > 0 {
            self.logger.log(
                LogLevel::Info,
                LogTarget::Maintainer,
                &format!(
                    "{}: flushed {} batches ({} uploaded, {} failed)",
                    report.feature, report.deleted, report.uploaded, report.failed
                ),
            );
        }
        report
    }
}
