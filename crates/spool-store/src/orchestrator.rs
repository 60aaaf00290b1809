//! Batch file selection and rotation.
//!
//! Batch files are named by their creation time in epoch milliseconds. The
//! orchestrator never locks files against each other; it partitions them by
//! age instead:
//!
//! - a file is **writable** while `ts >= now - 0.95 × window`
//! - a file is **readable** once `ts < now - 1.05 × window`
//!
//! The gap between the two thresholds guarantees that the file handed to the
//! persistence worker is never handed to the uploader at the same time.
//!
//! Housekeeping runs on the write path at most once per cleanup frequency:
//! obsolete batches are deleted, then the oldest batches are purged until the
//! directory fits its disk budget.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use spool_common::{InternalLogger, LogLevel, LogTarget, TimeProvider};
use spool_config::FilePersistenceConfig;

use crate::file_ops;
use crate::metrics::{BatchMetadata, MetricsDispatcher, RemovalReason};

pub(crate) const METADATA_SUFFIX: &str = "_metadata";
const WRITE_DELAY_FACTOR: f64 = 0.95;
const READ_DELAY_FACTOR: f64 = 1.05;

/// Creation timestamp encoded in a batch file name.
pub fn batch_file_timestamp(file: &Path) -> Option<i64> {
    let name = file.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Whether `file` is a batch rather than a sidecar or a stray file.
pub fn is_batch_file(file: &Path) -> bool {
    batch_file_timestamp(file).is_some()
}

/// Decides which file receives writes and which files are ready for upload.
pub trait FileOrchestrator: Send + Sync {
    /// A file able to take `data_size` more bytes, or `None` if storage is unavailable.
    fn get_writable_file(&self, data_size: u64) -> Option<PathBuf>;

    /// Oldest sealed batch not in `exclude`.
    fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf>;

    /// Every batch, oldest first, for a final flush.
    fn get_flushable_files(&self) -> Vec<PathBuf>;

    fn get_all_files(&self) -> Vec<PathBuf>;

    fn get_root_dir(&self) -> Option<PathBuf>;

    /// Configured root, without creating or checking it.
    fn root_path(&self) -> Option<&Path> {
        None
    }

    /// Sidecar path holding the metadata of `file`.
    fn get_metadata_file(&self, file: &Path) -> Option<PathBuf>;

    /// Force the next writable file query to start a new batch.
    fn request_new_batch(&self) {}

    /// Account for one batch leaving the disk and return the remaining count.
    fn decrement_pending_files(&self) -> i64 {
        0
    }
}

/// Orchestrator that never yields a file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFileOrchestrator;

impl FileOrchestrator for NoOpFileOrchestrator {
    fn get_writable_file(&self, _data_size: u64) -> Option<PathBuf> {
        None
    }

    fn get_readable_file(&self, _exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        None
    }

    fn get_flushable_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn get_all_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn get_root_dir(&self) -> Option<PathBuf> {
        None
    }

    fn get_metadata_file(&self, _file: &Path) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Default)]
struct WriterState {
    current: Option<PathBuf>,
    metadata: BatchMetadata,
    force_new: bool,
}

/// Orchestrator over a single directory of batch files.
pub struct BatchFileOrchestrator {
    root_dir: PathBuf,
    config: FilePersistenceConfig,
    recent_write_delay_ms: i64,
    recent_read_delay_ms: i64,
    writer: Mutex<WriterState>,
    root_lock: Mutex<()>,
    last_cleanup_ms: AtomicI64,
    pending_files: AtomicI64,
    metrics: Arc<dyn MetricsDispatcher>,
    time: Arc<dyn TimeProvider>,
    logger: Arc<dyn InternalLogger>,
}

impl BatchFileOrchestrator {
    pub fn new(
        root_dir: PathBuf,
        config: FilePersistenceConfig,
        metrics: Arc<dyn MetricsDispatcher>,
        time: Arc<dyn TimeProvider>,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        let window = config.recent_delay_ms as f64;
        Self {
            root_dir,
            config,
            recent_write_delay_ms: (window * WRITE_DELAY_FACTOR) as i64,
            recent_read_delay_ms: (window * READ_DELAY_FACTOR) as i64,
            writer: Mutex::new(WriterState::default()),
            root_lock: Mutex::new(()),
            last_cleanup_ms: AtomicI64::new(0),
            pending_files: AtomicI64::new(0),
            metrics,
            time,
            logger,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    pub fn config(&self) -> &FilePersistenceConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.time.device_timestamp_millis()
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.logger.log(level, LogTarget::Maintainer, message);
    }

    fn is_root_dir_valid(&self) -> bool {
        let logger = self.logger.as_ref();
        if file_ops::exists_safe(&self.root_dir, logger) {
            if !file_ops::is_dir_safe(&self.root_dir, logger) {
                self.log(
                    LogLevel::Error,
                    &format!("storage root {} is not a directory", self.root_dir.display()),
                );
                return false;
            }
            if !file_ops::can_write_safe(&self.root_dir, logger) {
                self.log(
                    LogLevel::Error,
                    &format!("storage root {} is not writable", self.root_dir.display()),
                );
                return false;
            }
            return true;
        }

        let _guard = self.root_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if file_ops::exists_safe(&self.root_dir, logger) {
            return true;
        }
        if file_ops::mkdirs_safe(&self.root_dir, logger) {
            true
        } else {
            self.log(
                LogLevel::Error,
                &format!("unable to create storage root {}", self.root_dir.display()),
            );
            false
        }
    }

    /// Batch files of the root, oldest first.
    fn list_sorted_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<(i64, PathBuf)> =
            file_ops::list_files_safe(&self.root_dir, self.logger.as_ref())
                .into_iter()
                .filter_map(|f| batch_file_timestamp(&f).map(|ts| (ts, f)))
                .collect();
        files.sort();
        files.into_iter().map(|(_, f)| f).collect()
    }

    fn is_file_recent(&self, file: &Path, delay_ms: i64) -> bool {
        let ts = batch_file_timestamp(file).unwrap_or(0);
        ts >= self.now() - delay_ms
    }

    fn metadata_path(file: &Path) -> PathBuf {
        let mut name = OsString::from(file.as_os_str());
        name.push(METADATA_SUFFIX);
        PathBuf::from(name)
    }

    fn sidecar_len(&self, file: &Path) -> u64 {
        let sidecar = Self::metadata_path(file);
        if file_ops::exists_safe(&sidecar, self.logger.as_ref()) {
            file_ops::len_safe(&sidecar, self.logger.as_ref())
        } else {
            0
        }
    }

    fn delete_batch_file(&self, file: &Path, reason: RemovalReason) -> bool {
        let logger = self.logger.as_ref();
        if !file_ops::delete_safe(file, logger) {
            return false;
        }
        let pending = self.decrement_pending_files();
        self.metrics.send_batch_deleted_metric(file, reason, pending);

        let sidecar = Self::metadata_path(file);
        if file_ops::exists_safe(&sidecar, logger) {
            file_ops::delete_safe(&sidecar, logger);
        }
        true
    }

    fn delete_obsolete_files(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let threshold = self.now() - self.config.old_file_threshold_ms as i64;
        files
            .into_iter()
            .filter(|file| {
                let ts = batch_file_timestamp(file).unwrap_or(0);
                if ts < threshold {
                    self.delete_batch_file(file, RemovalReason::Obsolete);
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    fn free_space_if_needed(&self, files: &[PathBuf]) {
        let logger = self.logger.as_ref();
        let sizes: Vec<u64> = files
            .iter()
            .map(|f| file_ops::len_safe(f, logger) + self.sidecar_len(f))
            .collect();
        let total: u64 = sizes.iter().sum();
        if total <= self.config.max_disk_space {
            return;
        }

        let mut to_free = total - self.config.max_disk_space;
        self.log(
            LogLevel::Error,
            &format!(
                "{} uses {} bytes, above the {} byte budget; purging {} bytes",
                self.root_dir.display(),
                total,
                self.config.max_disk_space,
                to_free
            ),
        );
        for (file, size) in files.iter().zip(sizes) {
            if to_free == 0 {
                break;
            }
            if self.delete_batch_file(file, RemovalReason::Purged) {
                to_free = to_free.saturating_sub(size);
            }
        }
    }

    fn cleanup_if_due(&self) {
        let now = self.now();
        let last = self.last_cleanup_ms.load(Ordering::SeqCst);
        if now - last < self.config.cleanup_frequency_ms as i64 {
            return;
        }
        if self
            .last_cleanup_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let files = self.delete_obsolete_files(self.list_sorted_files());
        self.free_space_if_needed(&files);
    }

    fn reusable_writable_file(&self, state: &mut WriterState, data_size: u64) -> Option<PathBuf> {
        let current = state.current.clone()?;
        if state.force_new {
            return None;
        }
        // Another writer (or a previous session) created a newer batch.
        if self.list_sorted_files().last() != Some(&current) {
            return None;
        }

        let logger = self.logger.as_ref();
        let recent = self.is_file_recent(&current, self.recent_write_delay_ms);
        let has_room =
            file_ops::len_safe(&current, logger) + data_size <= self.config.max_batch_size;
        let has_slot = state.metadata.events_count < self.config.max_items_per_batch;
        if recent && has_room && has_slot {
            state.metadata.events_count += 1;
            state.metadata.last_time_used_ms = self.now();
            Some(current)
        } else {
            None
        }
    }

    fn create_new_file(&self, state: &mut WriterState) -> PathBuf {
        let now = self.now();
        let mut ts = now;
        let mut candidate = self.root_dir.join(ts.to_string());
        while state.current.as_ref() == Some(&candidate)
            || file_ops::exists_safe(&candidate, self.logger.as_ref())
        {
            ts += 1;
            candidate = self.root_dir.join(ts.to_string());
        }

        if let Some(previous) = state.current.take() {
            let mut closed = state.metadata;
            closed.forced_new = state.force_new;
            self.metrics.send_batch_closed_metric(&previous, closed);
        }

        state.current = Some(candidate.clone());
        state.metadata = BatchMetadata {
            last_time_used_ms: now,
            forced_new: false,
            events_count: 1,
        };
        state.force_new = false;
        self.pending_files.fetch_add(1, Ordering::SeqCst);
        candidate
    }
}

impl FileOrchestrator for BatchFileOrchestrator {
    fn get_writable_file(&self, data_size: u64) -> Option<PathBuf> {
        if !self.is_root_dir_valid() {
            return None;
        }
        self.cleanup_if_due();

        let mut state = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = self.reusable_writable_file(&mut state, data_size) {
            return Some(file);
        }
        Some(self.create_new_file(&mut state))
    }

    fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        if !self.is_root_dir_valid() {
            return None;
        }
        let files = self.delete_obsolete_files(self.list_sorted_files());
        self.last_cleanup_ms.store(self.now(), Ordering::SeqCst);
        self.pending_files
            .store(files.len() as i64, Ordering::SeqCst);

        files.into_iter().find(|file| {
            !exclude.contains(file) && !self.is_file_recent(file, self.recent_read_delay_ms)
        })
    }

    fn get_flushable_files(&self) -> Vec<PathBuf> {
        if !self.is_root_dir_valid() {
            return Vec::new();
        }
        self.list_sorted_files()
    }

    fn get_all_files(&self) -> Vec<PathBuf> {
        if !self.is_root_dir_valid() {
            return Vec::new();
        }
        self.list_sorted_files()
    }

    fn get_root_dir(&self) -> Option<PathBuf> {
        if self.is_root_dir_valid() {
            Some(self.root_dir.clone())
        } else {
            None
        }
    }

    fn root_path(&self) -> Option<&Path> {
        Some(&self.root_dir)
    }

    fn get_metadata_file(&self, file: &Path) -> Option<PathBuf> {
        if file.parent() != Some(self.root_dir.as_path()) {
            self.log(
                LogLevel::Debug,
                &format!(
                    "{} is not in the storage root {}",
                    file.display(),
                    self.root_dir.display()
                ),
            );
        }
        if is_batch_file(file) {
            Some(Self::metadata_path(file))
        } else {
            self.log(
                LogLevel::Error,
                &format!("{} is not a batch file, it has no metadata", file.display()),
            );
            None
        }
    }

    fn request_new_batch(&self) {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .force_new = true;
    }

    fn decrement_pending_files(&self) -> i64 {
        let previous = self
            .pending_files
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n - 1).max(0)))
            .unwrap_or(0);
        (previous - 1).max(0)
    }
}
