//! On-disk inventory of a feature's batches, for `spool status`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use spool_common::{InternalLogger, TimeProvider};
use spool_store::{
    batch_file_timestamp, file_ops, granted_dir_name, is_batch_file, pending_dir_name, BatchStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub age_ms: i64,
    pub size_bytes: u64,
    pub records: usize,
    pub has_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootInventory {
    pub path: PathBuf,
    pub batches: Vec<BatchInfo>,
    pub total_bytes: u64,
    pub total_records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureInventory {
    pub feature: String,
    /// Uploadable data.
    pub granted: RootInventory,
    /// Data held until consent is decided.
    pub pending: RootInventory,
}

/// Scan both roots of `feature` under `storage_dir`.
pub fn scan_feature(
    storage_dir: &Path,
    feature: &str,
    store: &dyn BatchStore,
    time: &dyn TimeProvider,
    logger: &dyn InternalLogger,
) -> FeatureInventory {
    FeatureInventory {
        feature: feature.to_string(),
        granted: scan_root(&storage_dir.join(granted_dir_name(feature)), store, time, logger),
        pending: scan_root(&storage_dir.join(pending_dir_name(feature)), store, time, logger),
    }
}

fn scan_root(
    root: &Path,
    store: &dyn BatchStore,
    time: &dyn TimeProvider,
    logger: &dyn InternalLogger,
) -> RootInventory {
    let now = time.device_timestamp_millis();
    let mut batches: Vec<(i64, BatchInfo)> = if file_ops::exists_safe(root, logger) {
        file_ops::list_files_safe(root, logger)
            .into_iter()
            .filter(|path| is_batch_file(path))
            .filter_map(|path| {
                let ts = batch_file_timestamp(&path)?;
                let name = path.file_name()?.to_string_lossy().into_owned();
                let sidecar = metadata_path(&path);
                Some((
                    ts,
                    BatchInfo {
                        name,
                        created_at: DateTime::from_timestamp_millis(ts),
                        age_ms: now - ts,
                        size_bytes: file_ops::len_safe(&path, logger),
                        records: store.read(&path).len(),
                        has_metadata: file_ops::exists_safe(&sidecar, logger),
                    },
                ))
            })
            .collect()
    } else {
        Vec::new()
    };
    batches.sort_by_key(|(ts, _)| *ts);
    let batches: Vec<BatchInfo> = batches.into_iter().map(|(_, info)| info).collect();

    RootInventory {
        path: root.to_path_buf(),
        total_bytes: batches.iter().map(|b| b.size_bytes).sum(),
        total_records: batches.iter().map(|b| b.records).sum(),
        batches,
    }
}

fn metadata_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push("_metadata");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_common::testing::{FakeTimeProvider, RecordingLogger};
    use spool_store::PlainBatchStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn scan_lists_batches_oldest_first() {
        let temp = TempDir::new().unwrap();
        let logger = Arc::new(RecordingLogger::new());
        let store = PlainBatchStore::new(logger.clone());
        let root = temp.path().join(granted_dir_name("logs"));
        std::fs::create_dir_all(&root).unwrap();

        let newer = root.join("1700000002000");
        let older = root.join("1700000001000");
        assert!(store.write(&newer, b"c", true));
        assert!(store.write(&older, b"a", true));
        assert!(store.write(&older, b"b", true));
        std::fs::write(metadata_path(&older), b"meta").unwrap();

        let inventory = scan_feature(
            temp.path(),
            "logs",
            &store,
            &FakeTimeProvider::new(1_700_000_005_000),
            logger.as_ref(),
        );

        let names: Vec<_> = inventory.granted.batches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["1700000001000", "1700000002000"]);
        assert_eq!(inventory.granted.batches[0].records, 2);
        assert_eq!(inventory.granted.batches[0].age_ms, 4_000);
        assert!(inventory.granted.batches[0].has_metadata);
        assert!(!inventory.granted.batches[1].has_metadata);
        assert_eq!(inventory.granted.total_records, 3);
        assert!(inventory.pending.batches.is_empty());
    }
}
