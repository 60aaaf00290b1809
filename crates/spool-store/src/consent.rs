//! Consent-gated storage roots.
//!
//! Each feature owns two directories: a pending root holding data collected
//! before the user decided, and a granted root whose batches are uploaded.
//! Consent transitions migrate data between them on the persistence
//! executor, so a migration is ordered with the writes around it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use spool_common::{ConsentListener, ConsentState, InternalLogger, LogLevel, LogTarget};

use crate::executor::PersistenceExecutor;
use crate::mover::FileMover;
use crate::orchestrator::{FileOrchestrator, NoOpFileOrchestrator};

const MAX_MIGRATION_ATTEMPTS: u32 = 3;
const MIGRATION_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Directory names of a feature's storage roots.
pub fn pending_dir_name(feature: &str) -> String {
    format!("{}-pending-v2", feature)
}

pub fn granted_dir_name(feature: &str) -> String {
    format!("{}-v2", feature)
}

/// What a consent transition does to the data on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    NoOp,
    Wipe(PathBuf),
    Move { from: PathBuf, to: PathBuf },
}

/// Plans and runs the data migration for a consent transition.
pub struct ConsentAwareFileMigrator {
    mover: FileMover,
    logger: Arc<dyn InternalLogger>,
    retry_delay: Duration,
}

impl ConsentAwareFileMigrator {
    pub fn new(mover: FileMover, logger: Arc<dyn InternalLogger>) -> Self {
        Self {
            mover,
            logger,
            retry_delay: MIGRATION_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// `previous` is `None` for the initial consent.
    pub fn plan(
        previous: Option<ConsentState>,
        new: ConsentState,
        pending_root: Option<PathBuf>,
        granted_root: Option<PathBuf>,
    ) -> MigrationOperation {
        use ConsentState::*;

        match (previous, new) {
            (None, Pending)
            | (Some(NotGranted), Pending)
            | (Some(Granted), Pending)
            | (Some(Pending), NotGranted) => match pending_root {
                Some(root) => MigrationOperation::Wipe(root),
                None => MigrationOperation::NoOp,
            },
            (Some(Pending), Granted) => match (pending_root, granted_root) {
                (Some(from), Some(to)) => MigrationOperation::Move { from, to },
                _ => MigrationOperation::NoOp,
            },
            _ => MigrationOperation::NoOp,
        }
    }

    /// Run `operation`, retrying a few times before giving up.
    pub fn run(&self, operation: &MigrationOperation) -> bool {
        if *operation == MigrationOperation::NoOp {
            return true;
        }
        for attempt in 1..=MAX_MIGRATION_ATTEMPTS {
            let done = match operation {
                MigrationOperation::NoOp => true,
                MigrationOperation::Wipe(root) => self.mover.delete(root),
                MigrationOperation::Move { from, to } => self.mover.move_children(from, to),
            };
            if done {
                return true;
            }
            if attempt < MAX_MIGRATION_ATTEMPTS {
                thread::sleep(self.retry_delay);
            }
        }
        self.logger.log(
            LogLevel::Error,
            LogTarget::Maintainer,
            &format!(
                "data migration {:?} failed after {} attempts",
                operation, MAX_MIGRATION_ATTEMPTS
            ),
        );
        false
    }
}

/// Orchestrator routing writes by consent and reads to the granted root only.
pub struct ConsentAwareFileOrchestrator {
    pending: Arc<dyn FileOrchestrator>,
    granted: Arc<dyn FileOrchestrator>,
    no_op: NoOpFileOrchestrator,
    consent: Arc<RwLock<ConsentState>>,
    migrator: Arc<ConsentAwareFileMigrator>,
    executor: Arc<PersistenceExecutor>,
}

impl ConsentAwareFileOrchestrator {
    /// Create the orchestrator and schedule the migration for `initial`.
    ///
    /// The caller registers the result with its `ConsentProvider`.
    pub fn new(
        initial: ConsentState,
        pending: Arc<dyn FileOrchestrator>,
        granted: Arc<dyn FileOrchestrator>,
        migrator: ConsentAwareFileMigrator,
        executor: Arc<PersistenceExecutor>,
    ) -> Self {
        let orchestrator = Self {
            pending,
            granted,
            no_op: NoOpFileOrchestrator,
            consent: Arc::new(RwLock::new(initial)),
            migrator: Arc::new(migrator),
            executor,
        };
        orchestrator.schedule_migration(None, initial);
        orchestrator
    }

    /// Consent currently applied to writes.
    pub fn consent(&self) -> ConsentState {
        *self.consent.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn delegate(&self) -> &dyn FileOrchestrator {
        match self.consent() {
            ConsentState::Granted => self.granted.as_ref(),
            ConsentState::Pending => self.pending.as_ref(),
            ConsentState::NotGranted => &self.no_op,
        }
    }

    fn schedule_migration(&self, previous: Option<ConsentState>, new: ConsentState) {
        let pending = self.pending.clone();
        let granted = self.granted.clone();
        let migrator = self.migrator.clone();
        let consent = self.consent.clone();
        let label = match previous {
            Some(previous) => format!("consent migration {} -> {}", previous, new),
            None => format!("consent migration initial -> {}", new),
        };
        self.executor.submit(label, move || {
            // Roots are only resolved, and so created, when data has to change.
            let planned = ConsentAwareFileMigrator::plan(
                previous,
                new,
                pending.root_path().map(Path::to_path_buf),
                granted.root_path().map(Path::to_path_buf),
            );
            let operation = match planned {
                MigrationOperation::NoOp => MigrationOperation::NoOp,
                _ => ConsentAwareFileMigrator::plan(
                    previous,
                    new,
                    pending.get_root_dir(),
                    granted.get_root_dir(),
                ),
            };
            migrator.run(&operation);
            *consent.write().unwrap_or_else(PoisonError::into_inner) = new;
        });
    }
}

impl FileOrchestrator for ConsentAwareFileOrchestrator {
    fn get_writable_file(&self, data_size: u64) -> Option<PathBuf> {
        self.delegate().get_writable_file(data_size)
    }

    fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        self.granted.get_readable_file(exclude)
    }

    fn get_flushable_files(&self) -> Vec<PathBuf> {
        self.granted.get_flushable_files()
    }

    /// Batches of both roots.
    fn get_all_files(&self) -> Vec<PathBuf> {
        let mut files = self.pending.get_all_files();
        files.extend(self.granted.get_all_files());
        files
    }

    fn get_root_dir(&self) -> Option<PathBuf> {
        self.delegate().get_root_dir()
    }

    fn get_metadata_file(&self, file: &Path) -> Option<PathBuf> {
        let in_pending = self
            .pending
            .root_path()
            .is_some_and(|root| file.parent() == Some(root));
        if in_pending {
            self.pending.get_metadata_file(file)
        } else {
            self.granted.get_metadata_file(file)
        }
    }

    fn request_new_batch(&self) {
        self.pending.request_new_batch();
        self.granted.request_new_batch();
    }

    fn decrement_pending_files(&self) -> i64 {
        self.granted.decrement_pending_files()
    }
}

impl ConsentListener for ConsentAwareFileOrchestrator {
    fn on_consent_updated(&self, previous: ConsentState, new: ConsentState) {
        self.schedule_migration(Some(previous), new);
    }
}
