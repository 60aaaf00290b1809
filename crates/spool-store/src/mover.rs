//! Batch file deletion and directory migration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use spool_common::{InternalLogger, LogLevel, LogTarget};

use crate::file_ops;
use crate::orchestrator::{batch_file_timestamp, METADATA_SUFFIX};

/// Deletes batches and moves whole directories of them.
#[derive(Clone)]
pub struct FileMover {
    logger: Arc<dyn InternalLogger>,
}

impl FileMover {
    pub fn new(logger: Arc<dyn InternalLogger>) -> Self {
        Self { logger }
    }

    /// Delete a file, or a directory recursively. A missing target counts as deleted.
    pub fn delete(&self, target: &Path) -> bool {
        if !file_ops::exists_safe(target, self.logger.as_ref()) {
            self.logger.log(
                LogLevel::Debug,
                LogTarget::Maintainer,
                &format!("nothing to delete at {}", target.display()),
            );
            return true;
        }
        file_ops::delete_safe(target, self.logger.as_ref())
    }

    /// Move every child of `src_dir` into `dest_dir`, creating it if needed.
    pub fn move_children(&self, src_dir: &Path, dest_dir: &Path) -> bool {
        let logger = self.logger.as_ref();
        if !file_ops::exists_safe(src_dir, logger) {
            self.logger.log(
                LogLevel::Info,
                LogTarget::Maintainer,
                &format!("nothing to move, {} does not exist", src_dir.display()),
            );
            return true;
        }
        if !file_ops::is_dir_safe(src_dir, logger) {
            self.logger.log(
                LogLevel::Error,
                LogTarget::Maintainer,
                &format!("cannot move children of {}: not a directory", src_dir.display()),
            );
            return false;
        }
        if !file_ops::exists_safe(dest_dir, logger) {
            if !file_ops::mkdirs_safe(dest_dir, logger) {
                return false;
            }
        } else if !file_ops::is_dir_safe(dest_dir, logger) {
            self.logger.log(
                LogLevel::Error,
                LogTarget::Maintainer,
                &format!("cannot move into {}: not a directory", dest_dir.display()),
            );
            return false;
        }

        let mut moved_all = true;
        for child in file_ops::list_files_safe(src_dir, logger) {
            let Some(name) = child.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            // Already moved along with its batch.
            if !file_ops::exists_safe(&child, logger) {
                continue;
            }
            // Sidecars travel with their batch.
            if let Some(batch) = name.strip_suffix(METADATA_SUFFIX) {
                if batch_file_timestamp(&src_dir.join(batch)).is_some()
                    && file_ops::exists_safe(&src_dir.join(batch), logger)
                {
                    continue;
                }
            }

            let target = match batch_file_timestamp(&child) {
                Some(ts) => self.free_batch_path(dest_dir, ts),
                None => {
                    let target = dest_dir.join(&name);
                    if file_ops::exists_safe(&target, logger) {
                        self.logger.log(
                            LogLevel::Warn,
                            LogTarget::Maintainer,
                            &format!(
                                "{} already exists, leaving {} in place",
                                target.display(),
                                child.display()
                            ),
                        );
                        continue;
                    }
                    target
                }
            };
            if !file_ops::rename_safe(&child, &target, logger) {
                moved_all = false;
                continue;
            }

            let sidecar = src_dir.join(format!("{}{}", name, METADATA_SUFFIX));
            if batch_file_timestamp(&child).is_some() && file_ops::exists_safe(&sidecar, logger) {
                let mut moved_sidecar = target.into_os_string();
                moved_sidecar.push(METADATA_SUFFIX);
                if !file_ops::rename_safe(&sidecar, Path::new(&moved_sidecar), logger) {
                    moved_all = false;
                }
            }
        }
        moved_all
    }

    /// First batch name at or after `ts` free in `dir`, together with its sidecar.
    fn free_batch_path(&self, dir: &Path, ts: i64) -> PathBuf {
        let logger = self.logger.as_ref();
        let mut ts = ts;
        loop {
            let candidate = dir.join(ts.to_string());
            let sidecar = dir.join(format!("{}{}", ts, METADATA_SUFFIX));
            if !file_ops::exists_safe(&candidate, logger) && !file_ops::exists_safe(&sidecar, logger) {
                return candidate;
            }
            ts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_common::testing::RecordingLogger;
    use std::fs;
    use tempfile::TempDir;

    fn mover() -> (FileMover, Arc<RecordingLogger>) {
        let logger = Arc::new(RecordingLogger::new());
        (FileMover::new(logger.clone()), logger)
    }

    #[test]
    fn moves_children_into_new_directory() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("logs-pending-v2");
        let dest = temp.path().join("logs-v2");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("1700000000000"), b"a").unwrap();
        fs::write(src.join("1700000000000_metadata"), b"m").unwrap();

        let (mover, _) = mover();
        assert!(mover.move_children(&src, &dest));

        assert!(dest.join("1700000000000").exists());
        assert!(dest.join("1700000000000_metadata").exists());
        assert_eq!(fs::read_dir(&src).unwrap().count(), 0);
    }

    #[test]
    fn colliding_batches_are_renamed_not_overwritten() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("logs-pending-v2");
        let dest = temp.path().join("logs-v2");
        fs::create_dir(&src).unwrap();
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("1700000000000"), b"granted").unwrap();
        fs::write(dest.join("1700000000001"), b"granted-next").unwrap();
        fs::write(src.join("1700000000000"), b"pending").unwrap();
        fs::write(src.join("1700000000000_metadata"), b"pending-meta").unwrap();

        let (mover, _) = mover();
        assert!(mover.move_children(&src, &dest));

        assert_eq!(fs::read(dest.join("1700000000000")).unwrap(), b"granted");
        assert_eq!(fs::read(dest.join("1700000000001")).unwrap(), b"granted-next");
        assert_eq!(fs::read(dest.join("1700000000002")).unwrap(), b"pending");
        assert_eq!(
            fs::read(dest.join("1700000000002_metadata")).unwrap(),
            b"pending-meta"
        );
        assert_eq!(fs::read_dir(&src).unwrap().count(), 0);
    }

    #[test]
    fn colliding_stray_file_is_left_in_place() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        fs::create_dir(&src).unwrap();
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("notes"), b"kept").unwrap();
        fs::write(src.join("notes"), b"incoming").unwrap();

        let (mover, logger) = mover();
        assert!(mover.move_children(&src, &dest));

        assert_eq!(fs::read(dest.join("notes")).unwrap(), b"kept");
        assert!(src.join("notes").exists());
        assert!(logger.contains(LogLevel::Warn, "already exists"));
    }

    #[test]
    fn missing_source_is_a_successful_no_op() {
        let temp = TempDir::new().unwrap();
        let (mover, logger) = mover();
        assert!(mover.move_children(&temp.path().join("absent"), &temp.path().join("dest")));
        assert!(logger.contains(LogLevel::Info, "nothing to move"));
        assert!(!temp.path().join("dest").exists());
    }

    #[test]
    fn file_as_destination_is_rejected() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        let dest = temp.path().join("dest");
        fs::write(&dest, b"not a dir").unwrap();

        let (mover, logger) = mover();
        assert!(!mover.move_children(&src, &dest));
        assert!(logger.contains(LogLevel::Error, "not a directory"));
    }

    #[test]
    fn delete_handles_files_directories_and_missing_targets() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("rum-v2");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("1700000000000"), b"x").unwrap();

        let (mover, _) = mover();
        assert!(mover.delete(&dir.join("1700000000000")));
        assert!(mover.delete(&dir));
        assert!(!dir.exists());
        assert!(mover.delete(&dir));
    }
}
