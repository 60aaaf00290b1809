//! Time source abstraction.
//!
//! Batch file names and ages are derived from device time in epoch
//! milliseconds. Components take a `TimeProvider` so tests can drive the clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of device time.
pub trait TimeProvider: Send + Sync {
    /// Current device time in milliseconds since the Unix epoch.
    fn device_timestamp_millis(&self) -> i64;
}

/// Wall-clock time provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn device_timestamp_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
