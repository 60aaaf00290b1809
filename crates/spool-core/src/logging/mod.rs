//! Structured logging setup for the spool binary.
//!
//! Library crates only emit `tracing` events through
//! [`TracingLogger`](spool_common::TracingLogger); installing a subscriber is
//! the embedding application's call. The CLI installs one here:
//! - Human-readable console output on stderr
//! - JSON lines on stderr for machine consumers
//!
//! stdout is reserved for command payloads.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter from SPOOL_LOG, then RUST_LOG, then the configured level.
pub fn build_filter<F>(config: &LogConfig, lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    ["SPOOL_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|key| lookup(key))
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(config.default_directives()))
}

/// Install the global subscriber.
///
/// Returns false when a subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = build_filter(config, |key| std::env::var(key).ok());

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .is_ok()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
                    .is_ok()
            }
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .flatten_event(true);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init()
                .is_ok()
        }
    }
}
