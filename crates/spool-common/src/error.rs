//! Error types for the event spool.
//!
//! Failures inside the spool never cross into host-application code. Low-level
//! helpers return [`Result`], and callers at the component boundary convert an
//! [`Error`] into a safe default plus a log line. [`ErrorKind`] is the coarse
//! classification used for that decision:
//!
//! - `PermissionDenied`: the platform refused access (sandbox, read-only mount)
//! - `Corrupt`: on-disk data could not be decoded
//! - `IoFailure`: anything else the filesystem or serializer reported

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for spool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a spool error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    Corrupt,
    IoFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::PermissionDenied => write!(f, "permission_denied"),
            ErrorKind::Corrupt => write!(f, "corrupt"),
            ErrorKind::IoFailure => write!(f, "io_failure"),
        }
    }
}

/// Unified error type for the spool.
#[derive(Error, Debug)]
pub enum Error {
    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an I/O error that happened while touching `path`.
    ///
    /// Permission failures are lifted into [`Error::PermissionDenied`] so callers
    /// can tell a sandbox denial apart from a genuine I/O fault.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == io::ErrorKind::PermissionDenied {
            Error::PermissionDenied { path }
        } else {
            Error::Io { path, source }
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::Corrupt(_) | Error::Json(_) => ErrorKind::Corrupt,
            Error::Io { .. } | Error::Config(_) => ErrorKind::IoFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_io_is_lifted() {
        let err = Error::io(
            "/data/logs-v2",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("/data/logs-v2"));
    }

    #[test]
    fn other_io_is_io_failure() {
        let err = Error::io("/tmp/x", io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn json_errors_classify_as_corrupt() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::PermissionDenied.to_string(), "permission_denied");
        assert_eq!(ErrorKind::Corrupt.to_string(), "corrupt");
        assert_eq!(ErrorKind::IoFailure.to_string(), "io_failure");
    }
}
