//! Fuzz target for batch file decoding.
//!
//! Batch files survive crashes and partial writes, so `decode_records` sees
//! truncated and garbled input in practice. It must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spool_store::decode_records;

fuzz_target!(|data: &[u8]| {
    let decoded = decode_records(data);
    let recovered: usize = decoded.records.iter().map(Vec::len).sum();
    assert!(recovered <= data.len());
});
