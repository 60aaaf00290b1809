//! Event spool core.
//!
//! This crate wires the spool crates into a running system:
//! - [`Spool`]: shared persistence executor, consent fan-out, per-feature
//!   storage and upload workers, lifecycle channel, graceful shutdown
//! - Logging setup for the binary
//! - On-disk inventory used by `spool status`
//! - Exit codes for the CLI
//!
//! The binary entry point is in `main.rs`.

pub mod exit_codes;
pub mod inventory;
pub mod logging;
pub mod spool;

pub use spool::{FeatureHandle, Spool, SpoolOptions, StopReport};
