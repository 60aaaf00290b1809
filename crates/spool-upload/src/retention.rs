//! Retention policy for uploaded batches.
//!
//! Decides, from an [`UploadStatus`], whether a batch leaves the disk and why:
//!
//! 1. Success deletes with the intake's status code.
//! 2. Permanent failures delete as `invalid`, so a bad payload never loops.
//! 3. Retryable failures keep the batch until it is older than the retry
//!    budget, then purge it.
//!
//! The budget is age-based: a batch's age comes from its file name, so a
//! batch written in a previous session keeps its original age.

use std::path::Path;
use std::sync::Arc;

use spool_common::TimeProvider;
use spool_config::RetentionConfig;
use spool_store::{batch_file_timestamp, RemovalReason};

use crate::status::UploadStatus;

/// What happens to a batch after an upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    Delete(RemovalReason),
    Retain,
}

impl RetentionDecision {
    pub fn is_delete(&self) -> bool {
        matches!(self, RetentionDecision::Delete(_))
    }
}

pub struct RetentionPolicy {
    max_retry_age_ms: u64,
    time: Arc<dyn TimeProvider>,
}

impl RetentionPolicy {
    pub fn new(config: RetentionConfig, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            max_retry_age_ms: config.max_retry_age_ms,
            time,
        }
    }

    pub fn max_retry_age_ms(&self) -> u64 {
        self.max_retry_age_ms
    }

    /// Age of `file` in milliseconds, when its name is a timestamp.
    pub fn batch_age_ms(&self, file: &Path) -> Option<i64> {
        batch_file_timestamp(file).map(|ts| self.time.device_timestamp_millis() - ts)
    }

    pub fn decide(&self, file: &Path, status: &UploadStatus) -> RetentionDecision {
        if status.is_success() {
            // Success always carries a code.
            let code = status.code().unwrap_or(200);
            return RetentionDecision::Delete(RemovalReason::IntakeCode(code));
        }
        if status.is_permanent_failure() {
            return RetentionDecision::Delete(RemovalReason::Invalid);
        }
        match self.batch_age_ms(file) {
            Some(age) if age > self.max_retry_age_ms as i64 => {
                RetentionDecision::Delete(RemovalReason::Purged)
            }
            _ => RetentionDecision::Retain,
        }
    }
}
