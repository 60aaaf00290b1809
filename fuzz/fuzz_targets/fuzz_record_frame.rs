//! Fuzz target for record framing.
//!
//! Frames arbitrary records, appends trailing garbage, and checks that every
//! framed record is still recovered in order.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spool_store::{decode_records, encode_record};

#[derive(Debug, Arbitrary)]
struct Input {
    records: Vec<(Vec<u8>, bool)>,
    tail: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut file = Vec::new();
    for (data, with_meta) in &input.records {
        if let Ok(framed) = encode_record(data, *with_meta) {
            file.extend(framed);
        }
    }
    let framed_len = file.len();
    file.extend(&input.tail);

    let decoded = decode_records(&file[..framed_len]);
    assert!(decoded.issues.is_empty());
    let expected: Vec<Vec<u8>> = input.records.iter().map(|(d, _)| d.clone()).collect();
    assert_eq!(decoded.records, expected);

    let _ = decode_records(&file);
});
