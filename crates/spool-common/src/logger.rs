//! Injected logging capability.
//!
//! Spool components never log through a process-wide singleton. Each one is
//! handed an `Arc<dyn InternalLogger>` at construction time, which keeps the
//! components testable and lets an embedding application route spool output
//! wherever it wants. [`TracingLogger`] is the production implementation and
//! forwards to `tracing`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of an internal log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Verbose => write!(f, "verbose"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Audience of an internal log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// The developer embedding the spool.
    User,
    /// Spool maintainers; never shown to end users.
    Maintainer,
    /// Self-telemetry about the spool itself.
    Telemetry,
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::User => write!(f, "user"),
            LogTarget::Maintainer => write!(f, "maintainer"),
            LogTarget::Telemetry => write!(f, "telemetry"),
        }
    }
}

/// Logging capability passed to every spool component.
pub trait InternalLogger: Send + Sync {
    /// Record a log line for the given audience.
    fn log(&self, level: LogLevel, target: LogTarget, message: &str);

    /// Record a metric payload. Sampling has already been applied by the caller.
    fn log_metric(&self, name: &str, attributes: &serde_json::Value);
}

/// Logger forwarding to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        TracingLogger
    }
}

impl InternalLogger for TracingLogger {
    fn log(&self, level: LogLevel, target: LogTarget, message: &str) {
        match level {
            LogLevel::Verbose => tracing::trace!(audience = %target, "{}", message),
            LogLevel::Debug => tracing::debug!(audience = %target, "{}", message),
            LogLevel::Info => tracing::info!(audience = %target, "{}", message),
            LogLevel::Warn => tracing::warn!(audience = %target, "{}", message),
            LogLevel::Error => tracing::error!(audience = %target, "{}", message),
        }
    }

    fn log_metric(&self, name: &str, attributes: &serde_json::Value) {
        tracing::info!(
            audience = %LogTarget::Telemetry,
            metric = name,
            attributes = %attributes,
            "spool metric"
        );
    }
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl InternalLogger for NoOpLogger {
    fn log(&self, _level: LogLevel, _target: LogTarget, _message: &str) {}

    fn log_metric(&self, _name: &str, _attributes: &serde_json::Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_follows_severity() {
        assert!(LogLevel::Verbose < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn display_names_are_lowercase() {
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LogTarget::Maintainer.to_string(), "maintainer");
    }

    #[test]
    fn tracing_logger_does_not_panic_without_subscriber() {
        let logger = TracingLogger::new();
        logger.log(LogLevel::Error, LogTarget::Maintainer, "no subscriber installed");
        logger.log_metric("batch deleted", &serde_json::json!({"track": "logs"}));
    }
}
