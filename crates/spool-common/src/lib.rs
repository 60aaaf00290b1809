//! Event spool common types.
//!
//! This crate provides foundational types shared across the spool crates:
//! - Error taxonomy with a coarse [`ErrorKind`] classification
//! - The injected [`InternalLogger`] capability
//! - The [`TimeProvider`] abstraction used for batch naming and ages
//! - Tracking consent state and its provider
//! - Host application lifecycle events

pub mod consent;
pub mod error;
pub mod lifecycle;
pub mod logger;
pub mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use consent::{ConsentListener, ConsentProvider, ConsentState};
pub use error::{Error, ErrorKind, Result};
pub use lifecycle::{AppLifecycleEvent, LifecycleListener};
pub use logger::{InternalLogger, LogLevel, LogTarget, NoOpLogger, TracingLogger};
pub use time::{SystemTimeProvider, TimeProvider};
