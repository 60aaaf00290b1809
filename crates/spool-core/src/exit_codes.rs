//! Exit codes for the spool CLI.
//!
//! Exit code ranges:
//! - 0-9: Operational outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors

use spool_common::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-9)
    // ========================================================================
    /// Success
    Clean = 0,

    /// Some batches were kept on disk for a later retry
    Retained = 1,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Configuration missing, malformed or invalid
    ConfigError = 11,

    /// Permission denied
    PermissionError = 12,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    InternalError = 20,

    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::Retained => "OK_RETAINED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::PermissionError => "ERR_PERMISSION",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(error: &Error) -> Self {
        match error {
            Error::Config(_) | Error::Json(_) => ExitCode::ConfigError,
            _ => match error.kind() {
                ErrorKind::PermissionDenied => ExitCode::PermissionError,
                ErrorKind::Corrupt => ExitCode::InternalError,
                ErrorKind::IoFailure => ExitCode::IoError,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn ranges() {
        assert!(!ExitCode::Clean.is_error());
        assert!(!ExitCode::Retained.is_error());
        assert!(ExitCode::ArgsError.is_error());
        assert_eq!(ExitCode::IoError.as_i32(), 21);
    }

    #[test]
    fn errors_map_to_codes() {
        assert_eq!(
            ExitCode::from(&Error::Config("bad".to_string())),
            ExitCode::ConfigError
        );
        let denied = Error::io("/spool", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(ExitCode::from(&denied), ExitCode::PermissionError);
        let missing = Error::io("/spool", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(ExitCode::from(&missing), ExitCode::IoError);
        assert_eq!(
            ExitCode::from(&Error::Corrupt("x".to_string())),
            ExitCode::InternalError
        );
    }
}
