//! On-disk record framing.
//!
//! A batch file is a flat sequence of typed, length-prefixed blocks:
//!
//! ```text
//! [u16 BE block type][u32 BE payload length][payload]
//! ```
//!
//! A record is one `Event` block, optionally preceded by a `Meta` block whose
//! payload is the JSON document `{"ev_size": <event payload length>}`. Decoding
//! is tolerant: a truncated trailing block ends decoding without affecting the
//! records before it, and a damaged record is skipped rather than failing the
//! whole file.

use serde::{Deserialize, Serialize};
use spool_common::{Error, Result};

/// Size of a block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 6;

/// Block kinds understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BlockType {
    Event = 0x00,
    Meta = 0x01,
}

impl BlockType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x00 => Some(BlockType::Event),
            0x01 => Some(BlockType::Meta),
            _ => None,
        }
    }
}

/// Metadata record accompanying an event in event-meta framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(rename = "ev_size")]
    pub event_size: u64,
}

/// Something the decoder had to skip or stop at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeIssue {
    /// Fewer than [`BLOCK_HEADER_SIZE`] bytes left at `offset`.
    TruncatedHeader { offset: usize },
    /// The payload announced at `offset` runs past the end of the data.
    TruncatedPayload {
        offset: usize,
        expected: usize,
        available: usize,
    },
    UnknownBlockType { offset: usize, block_type: u16 },
    MalformedMeta { offset: usize, reason: String },
    SizeMismatch {
        offset: usize,
        expected: u64,
        actual: u64,
    },
    /// A meta block not followed by an event block.
    OrphanMeta { offset: usize },
}

impl std::fmt::Display for DecodeIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeIssue::TruncatedHeader { offset } => {
                write!(f, "truncated block header at offset {}", offset)
            }
            DecodeIssue::TruncatedPayload {
                offset,
                expected,
                available,
            } => write!(
                f,
                "truncated block at offset {}: expected {} bytes, {} available",
                offset, expected, available
            ),
            DecodeIssue::UnknownBlockType { offset, block_type } => {
                write!(f, "unknown block type {:#06x} at offset {}", block_type, offset)
            }
            DecodeIssue::MalformedMeta { offset, reason } => {
                write!(f, "malformed event meta at offset {}: {}", offset, reason)
            }
            DecodeIssue::SizeMismatch {
                offset,
                expected,
                actual,
            } => write!(
                f,
                "event at offset {} has {} bytes, meta announced {}",
                offset, actual, expected
            ),
            DecodeIssue::OrphanMeta { offset } => {
                write!(f, "event meta at offset {} has no event", offset)
            }
        }
    }
}

/// Result of decoding a batch file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedRecords {
    pub records: Vec<Vec<u8>>,
    pub issues: Vec<DecodeIssue>,
}

fn encode_block(out: &mut Vec<u8>, block_type: BlockType, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        Error::Corrupt(format!(
            "block payload of {} bytes exceeds the framing limit",
            payload.len()
        ))
    })?;
    out.extend_from_slice(&(block_type as u16).to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Frame one record, with a leading meta block when `with_meta` is set.
pub fn encode_record(data: &[u8], with_meta: bool) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 2 * BLOCK_HEADER_SIZE + 24);
    if with_meta {
        let meta = serde_json::to_vec(&EventMeta {
            event_size: data.len() as u64,
        })?;
        encode_block(&mut out, BlockType::Meta, &meta)?;
    }
    encode_block(&mut out, BlockType::Event, data)?;
    Ok(out)
}

/// Decode every recoverable record from `bytes`.
pub fn decode_records(bytes: &[u8]) -> DecodedRecords {
    let mut decoded = DecodedRecords::default();
    let mut pending_meta: Option<(usize, std::result::Result<EventMeta, String>)> = None;
    let mut offset = 0;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < BLOCK_HEADER_SIZE {
            decoded.issues.push(DecodeIssue::TruncatedHeader { offset });
            break;
        }

        let block_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        let len = u32::from_be_bytes([
            bytes[offset + 2],
            bytes[offset + 3],
            bytes[offset + 4],
            bytes[offset + 5],
        ]) as usize;
        let start = offset + BLOCK_HEADER_SIZE;
        let available = bytes.len() - start;
        if len > available {
            decoded.issues.push(DecodeIssue::TruncatedPayload {
                offset,
                expected: len,
                available,
            });
            break;
        }
        let payload = &bytes[start..start + len];

        match BlockType::from_u16(block_type) {
            Some(BlockType::Meta) => {
                if let Some((orphan, _)) = pending_meta.take() {
                    decoded.issues.push(DecodeIssue::OrphanMeta { offset: orphan });
                }
                let meta = serde_json::from_slice::<EventMeta>(payload).map_err(|e| e.to_string());
                pending_meta = Some((offset, meta));
            }
            Some(BlockType::Event) => match pending_meta.take() {
                None => decoded.records.push(payload.to_vec()),
                Some((_, Ok(meta))) if meta.event_size == payload.len() as u64 => {
                    decoded.records.push(payload.to_vec())
                }
                Some((_, Ok(meta))) => decoded.issues.push(DecodeIssue::SizeMismatch {
                    offset,
                    expected: meta.event_size,
                    actual: payload.len() as u64,
                }),
                Some((meta_offset, Err(reason))) => {
                    decoded.issues.push(DecodeIssue::MalformedMeta {
                        offset: meta_offset,
                        reason,
                    })
                }
            },
            None => decoded
                .issues
                .push(DecodeIssue::UnknownBlockType { offset, block_type }),
        }

        offset = start + len;
    }

    if let Some((orphan, _)) = pending_meta {
        decoded.issues.push(DecodeIssue::OrphanMeta { offset: orphan });
    }
    decoded
}
