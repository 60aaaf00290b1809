//! Fuzz target for spool config parsing.
//!
//! Tests that JSON config parsing and validation handle arbitrary input
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spool_config::SpoolConfig;

fuzz_target!(|data: &str| {
    if let Ok(config) = SpoolConfig::from_json(data) {
        let _ = config.validate();
        let _ = config.upload_configuration();
        let _ = config.file_persistence_config();
    }
});
