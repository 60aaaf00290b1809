//! Filesystem access that never fails loudly.
//!
//! Every call the spool makes against the filesystem goes through this module.
//! The plain functions return [`Result`] with the failure classified; the
//! `*_safe` variants turn any failure into a safe default (`false`, `0`, empty
//! list, `None`) and log it for maintainers. A sandbox denial or a vanished
//! directory must never surface as a crash in the host application.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use spool_common::{Error, InternalLogger, LogLevel, LogTarget, Result};

pub fn exists(path: &Path) -> Result<bool> {
    path.try_exists().map_err(|e| Error::io(path, e))
}

pub fn is_dir(path: &Path) -> Result<bool> {
    fs::metadata(path)
        .map(|m| m.is_dir())
        .map_err(|e| Error::io(path, e))
}

pub fn can_write(path: &Path) -> Result<bool> {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .map_err(|e| Error::io(path, e))
}

pub fn len(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| Error::io(path, e))
}

/// Delete a file, or a directory and everything below it.
pub fn delete(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path).map_err(|e| Error::io(path, e))?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(|e| Error::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| Error::io(path, e))
    }
}

pub fn mkdirs(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}

pub fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| Error::io(from, e))
}

/// Direct children of `dir`.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        files.push(entry.path());
    }
    Ok(files)
}

pub fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::io(path, e))
}

/// Write `data` in a single call, appending or truncating.
pub fn write(path: &Path, data: &[u8], append: bool) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    file.write_all(data).map_err(|e| Error::io(path, e))
}

fn log_failure(logger: &dyn InternalLogger, operation: &str, err: &Error) {
    logger.log(
        LogLevel::Error,
        LogTarget::Maintainer,
        &format!("filesystem {} failed ({}): {}", operation, err.kind(), err),
    );
}

pub fn exists_safe(path: &Path, logger: &dyn InternalLogger) -> bool {
    exists(path).unwrap_or_else(|e| {
        log_failure(logger, "exists", &e);
        false
    })
}

pub fn is_dir_safe(path: &Path, logger: &dyn InternalLogger) -> bool {
    is_dir(path).unwrap_or_else(|e| {
        log_failure(logger, "is_dir", &e);
        false
    })
}

pub fn can_write_safe(path: &Path, logger: &dyn InternalLogger) -> bool {
    can_write(path).unwrap_or_else(|e| {
        log_failure(logger, "can_write", &e);
        false
    })
}

pub fn len_safe(path: &Path, logger: &dyn InternalLogger) -> u64 {
    len(path).unwrap_or_else(|e| {
        log_failure(logger, "length", &e);
        0
    })
}

pub fn delete_safe(path: &Path, logger: &dyn InternalLogger) -> bool {
    match delete(path) {
        Ok(()) => true,
        Err(e) => {
            log_failure(logger, "delete", &e);
            false
        }
    }
}

pub fn mkdirs_safe(path: &Path, logger: &dyn InternalLogger) -> bool {
    match mkdirs(path) {
        Ok(()) => true,
        Err(e) => {
            log_failure(logger, "mkdirs", &e);
            false
        }
    }
}

pub fn rename_safe(from: &Path, to: &Path, logger: &dyn InternalLogger) -> bool {
    match rename(from, to) {
        Ok(()) => true,
        Err(e) => {
            log_failure(logger, "rename", &e);
            false
        }
    }
}

pub fn list_files_safe(dir: &Path, logger: &dyn InternalLogger) -> Vec<PathBuf> {
    list_files(dir).unwrap_or_else(|e| {
        log_failure(logger, "list_files", &e);
        Vec::new()
    })
}

pub fn read_safe(path: &Path, logger: &dyn InternalLogger) -> Option<Vec<u8>> {
    match read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log_failure(logger, "read", &e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_common::testing::RecordingLogger;
    use spool_common::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn missing_paths_degrade_to_defaults() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");
        let logger = RecordingLogger::new();

        assert!(!exists_safe(&missing, &logger));
        assert!(!is_dir_safe(&missing, &logger));
        assert_eq!(len_safe(&missing, &logger), 0);
        assert!(list_files_safe(&missing, &logger).is_empty());
        assert!(read_safe(&missing, &logger).is_none());
        assert!(!delete_safe(&missing, &logger));

        let entries = logger.entries();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e.target == LogTarget::Maintainer));
    }

    #[test]
    fn delete_is_recursive_for_directories() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("logs-v2");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested").join("1700000000000"), b"x").unwrap();
        fs::write(dir.join("1700000000001"), b"y").unwrap();

        delete(&dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn write_appends_or_truncates() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("batch");

        write(&file, b"abc", true).unwrap();
        write(&file, b"def", true).unwrap();
        assert_eq!(read(&file).unwrap(), b"abcdef");

        write(&file, b"xyz", false).unwrap();
        assert_eq!(read(&file).unwrap(), b"xyz");
        assert_eq!(len(&file).unwrap(), 3);
    }

    #[test]
    fn errors_are_classified() {
        let temp = TempDir::new().unwrap();
        let err = read(&temp.path().join("absent")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn list_files_returns_direct_children() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), b"").unwrap();
        fs::create_dir(temp.path().join("b")).unwrap();
        fs::write(temp.path().join("b").join("c"), b"").unwrap();

        let mut names: Vec<String> = list_files(temp.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
