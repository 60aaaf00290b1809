//! Event spool upload side.
//!
//! - [`UploadStatus`] classifies intake responses and transport failures
//! - [`HttpUploader`] sends a batch as one HTTP POST
//! - [`RetentionPolicy`] turns a status into delete or retain
//! - [`UploadScheduler`] runs adaptive periodic upload ticks per feature
//! - [`DataFlusher`] empties a feature synchronously at exit

pub mod flusher;
pub mod retention;
pub mod scheduler;
pub mod status;
pub mod uploader;

pub use flusher::{DataFlusher, FlushReport};
pub use retention::{RetentionDecision, RetentionPolicy};
pub use scheduler::{UploadRunReport, UploadScheduler};
pub use status::UploadStatus;
pub use uploader::{build_payload, DataUploader, HttpUploader};
