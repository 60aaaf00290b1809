//! Batch file reading and writing.
//!
//! [`BatchStore`] is the capability the rest of the spool writes through.
//! Framing lives in [`PlainBatchStore`]; [`EncryptedBatchStore`] wraps any
//! store and transforms payloads on the way in and out.

use std::path::Path;
use std::sync::Arc;

use spool_common::{InternalLogger, LogLevel, LogTarget};

use crate::file_ops;
use crate::record::{decode_records, encode_record};

/// Reads and writes the records of one batch file.
///
/// Failures never propagate: writes report `false`, reads return what could
/// be recovered.
pub trait BatchStore: Send + Sync {
    /// Append (or replace the file with) one framed record.
    fn write(&self, file: &Path, data: &[u8], append: bool) -> bool;

    /// Every record recoverable from `file`, in write order.
    fn read(&self, file: &Path) -> Vec<Vec<u8>>;

    /// Write unframed bytes, used for batch metadata sidecars.
    fn write_raw(&self, file: &Path, data: &[u8], append: bool) -> bool;

    fn read_raw(&self, file: &Path) -> Option<Vec<u8>>;
}

/// Payload transformation applied by [`EncryptedBatchStore`].
pub trait Encryption: Send + Sync {
    fn encrypt(&self, data: &[u8]) -> Vec<u8>;
    fn decrypt(&self, data: &[u8]) -> Vec<u8>;
}

/// Store writing length-prefixed records as is.
pub struct PlainBatchStore {
    logger: Arc<dyn InternalLogger>,
    event_meta: bool,
}

impl PlainBatchStore {
    pub fn new(logger: Arc<dyn InternalLogger>) -> Self {
        Self {
            logger,
            event_meta: false,
        }
    }

    /// Precede every event with an `{"ev_size": n}` meta block.
    pub fn with_event_meta(logger: Arc<dyn InternalLogger>) -> Self {
        Self {
            logger,
            event_meta: true,
        }
    }
}

impl BatchStore for PlainBatchStore {
    fn write(&self, file: &Path, data: &[u8], append: bool) -> bool {
        let framed = match encode_record(data, self.event_meta) {
            Ok(framed) => framed,
            Err(e) => {
                self.logger.log(
                    LogLevel::Error,
                    LogTarget::Maintainer,
                    &format!("unable to frame record for {}: {}", file.display(), e),
                );
                return false;
            }
        };
        self.write_raw(file, &framed, append)
    }

    fn read(&self, file: &Path) -> Vec<Vec<u8>> {
        let Some(bytes) = file_ops::read_safe(file, self.logger.as_ref()) else {
            return Vec::new();
        };
        let decoded = decode_records(&bytes);
        for issue in &decoded.issues {
            self.logger.log(
                LogLevel::Error,
                LogTarget::Maintainer,
                &format!("corrupt batch {}: {}", file.display(), issue),
            );
        }
        decoded.records
    }

    fn write_raw(&self, file: &Path, data: &[u8], append: bool) -> bool {
        match file_ops::write(file, data, append) {
            Ok(()) => true,
            Err(e) => {
                self.logger.log(
                    LogLevel::Error,
                    LogTarget::Maintainer,
                    &format!("unable to write {} ({}): {}", file.display(), e.kind(), e),
                );
                false
            }
        }
    }

    fn read_raw(&self, file: &Path) -> Option<Vec<u8>> {
        file_ops::read_safe(file, self.logger.as_ref())
    }
}

/// Decorator encrypting every record before it reaches the inner store.
pub struct EncryptedBatchStore<S> {
    encryption: Arc<dyn Encryption>,
    inner: S,
    logger: Arc<dyn InternalLogger>,
}

impl<S: BatchStore> EncryptedBatchStore<S> {
    pub fn new(encryption: Arc<dyn Encryption>, inner: S, logger: Arc<dyn InternalLogger>) -> Self {
        Self {
            encryption,
            inner,
            logger,
        }
    }

    fn encrypt_checked(&self, file: &Path, data: &[u8]) -> Option<Vec<u8>> {
        let encrypted = self.encryption.encrypt(data);
        if !data.is_empty() && encrypted.is_empty() {
            self.logger.log(
                LogLevel::Error,
                LogTarget::User,
                &format!(
                    "encryption returned no data for a {} byte payload, write to {} aborted",
                    data.len(),
                    file.display()
                ),
            );
            return None;
        }
        Some(encrypted)
    }
}

impl<S: BatchStore> BatchStore for EncryptedBatchStore<S> {
    fn write(&self, file: &Path, data: &[u8], append: bool) -> bool {
        match self.encrypt_checked(file, data) {
            Some(encrypted) => self.inner.write(file, &encrypted, append),
            None => false,
        }
    }

    fn read(&self, file: &Path) -> Vec<Vec<u8>> {
        self.inner
            .read(file)
            .iter()
            .map(|record| self.encryption.decrypt(record))
            .collect()
    }

    fn write_raw(&self, file: &Path, data: &[u8], append: bool) -> bool {
        match self.encrypt_checked(file, data) {
            Some(encrypted) => self.inner.write_raw(file, &encrypted, append),
            None => false,
        }
    }

    fn read_raw(&self, file: &Path) -> Option<Vec<u8>> {
        self.inner
            .read_raw(file)
            .map(|bytes| self.encryption.decrypt(&bytes))
    }
}

/// Build the store for a feature: plain, or encrypted when a provider is given.
pub fn create_batch_store(
    logger: Arc<dyn InternalLogger>,
    encryption: Option<Arc<dyn Encryption>>,
    event_meta: bool,
) -> Arc<dyn BatchStore> {
    let plain = if event_meta {
        PlainBatchStore::with_event_meta(logger.clone())
    } else {
        PlainBatchStore::new(logger.clone())
    };
    match encryption {
        Some(encryption) => Arc::new(EncryptedBatchStore::new(encryption, plain, logger)),
        None => Arc::new(plain),
    }
}
