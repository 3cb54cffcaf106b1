use crate::queue::store::{QueueStore, Result, StoreError, CORRUPT_SUFFIX, TMP_SUFFIX};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    /// An interrupted-but-valid current batch was promoted to pending.
    pub promoted_current: bool,
    /// An empty leftover current file was removed.
    pub removed_empty_current: bool,
    /// Unreadable pending/failed/current files quarantined with `.corrupt`.
    pub quarantined: usize,
    /// Orphaned temp files from interrupted atomic writes.
    pub removed_temp_files: usize,
}

/// Startup reconciliation. Runs exactly once, before any other component
/// touches the store.
///
/// A current batch with at least one signal is an interrupted-but-valid batch
/// and is promoted to pending, never dropped. Files that no longer
/// deserialize are quarantined under failed/ with a `.corrupt` marker for
/// forensics. Leftover `*.tmp` files are the debris of interrupted atomic
/// writes; their target files are intact, so they are simply removed.
pub fn recover(store: &QueueStore) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    reconcile_current(store, &mut report)?;
    validate_pending(store, &mut report)?;
    validate_failed(store, &mut report)?;

    report.removed_temp_files += remove_temp_files(store.root())?;
    report.removed_temp_files += remove_temp_files(&store.pending_dir())?;
    report.removed_temp_files += remove_temp_files(&store.failed_dir())?;

    info!(
        promoted_current = report.promoted_current,
        quarantined = report.quarantined,
        removed_temp_files = report.removed_temp_files,
        "Queue recovery complete"
    );

    Ok(report)
}

fn reconcile_current(store: &QueueStore, report: &mut RecoveryReport) -> Result<()> {
    match store.read_current() {
        Ok(Some(batch)) if !batch.is_empty() => {
            let entry = store.promote_current(&batch)?;
            info!(
                batch_id = %batch.batch_id,
                signals = batch.len(),
                file = %entry.file_name,
                "Promoted interrupted current batch to pending"
            );
            report.promoted_current = true;
        }
        Ok(Some(_)) => {
            store.clear_current()?;
            report.removed_empty_current = true;
        }
        Ok(None) => {}
        Err(StoreError::Json(e)) => {
            let quarantined = store.quarantine_corrupt(&store.current_path())?;
            warn!(
                error = %e,
                quarantined = %quarantined.display(),
                "Current batch file was unreadable, quarantined"
            );
            report.quarantined += 1;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

fn validate_pending(store: &QueueStore, report: &mut RecoveryReport) -> Result<()> {
    for entry in store.list_pending()? {
        match store.read_batch(&entry) {
            Ok(_) => {}
            Err(StoreError::Json(e)) => {
                let quarantined = store.quarantine_corrupt(&entry.path)?;
                warn!(
                    file = %entry.file_name,
                    error = %e,
                    quarantined = %quarantined.display(),
                    "Pending batch failed validation, quarantined"
                );
                report.quarantined += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn validate_failed(store: &QueueStore, report: &mut RecoveryReport) -> Result<()> {
    for entry in store.list_failed()? {
        // Already-quarantined files are known-bad; leave them alone
        if entry.file_name.ends_with(CORRUPT_SUFFIX) {
            continue;
        }

        let bytes = fs::read(&entry.path)?;
        if serde_json::from_slice::<crate::queue::batch::SignalBatch>(&bytes).is_err() {
            let quarantined = store.quarantine_corrupt(&entry.path)?;
            warn!(
                file = %entry.file_name,
                quarantined = %quarantined.display(),
                "Failed batch no longer deserializes, marked corrupt"
            );
            report.quarantined += 1;
        }
    }
    Ok(())
}

fn remove_temp_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(TMP_SUFFIX) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::batch::{Signal, SignalBatch};
    use tempfile::tempdir;

    fn make_batch(signal_count: usize) -> SignalBatch {
        let mut batch = SignalBatch::new("test-device");
        for i in 0..signal_count {
            batch
                .signals
                .push(Signal::new("test", serde_json::json!({ "n": i })));
        }
        batch
    }

    #[test]
    fn test_promotes_nonempty_current() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();
        store.write_current(&make_batch(3)).unwrap();

        let report = recover(&store).unwrap();
        assert!(report.promoted_current);
        assert!(!store.current_path().exists());

        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.read_batch(&pending[0]).unwrap().len(), 3);
    }

    #[test]
    fn test_removes_empty_current() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();
        store.write_current(&make_batch(0)).unwrap();

        let report = recover(&store).unwrap();
        assert!(report.removed_empty_current);
        assert!(!store.current_path().exists());
        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_quarantines_corrupt_current() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();
        std::fs::write(store.current_path(), b"{truncated").unwrap();

        let report = recover(&store).unwrap();
        assert_eq!(report.quarantined, 1);
        assert!(!store.current_path().exists());

        let failed = store.list_failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].file_name.ends_with(CORRUPT_SUFFIX));
    }

    #[test]
    fn test_quarantines_corrupt_pending_keeps_valid() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();
        store.enqueue(&make_batch(2)).unwrap();

        let bad = store.pending_dir().join(
            "batch-20260301T100000000Z-00000000-0000-0000-0000-000000000000.json",
        );
        std::fs::write(&bad, b"not json at all").unwrap();

        let report = recover(&store).unwrap();
        assert_eq!(report.quarantined, 1);
        assert_eq!(store.list_pending().unwrap().len(), 1);

        let failed = store.list_failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].file_name.ends_with(CORRUPT_SUFFIX));
    }

    #[test]
    fn test_removes_orphan_temp_files() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();

        std::fs::write(store.root().join("current.json.tmp"), b"{par").unwrap();
        std::fs::write(store.pending_dir().join("batch-x.json.tmp"), b"{par").unwrap();

        let report = recover(&store).unwrap();
        assert_eq!(report.removed_temp_files, 2);
        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_interrupted_append_preserves_previous_state() {
        // Simulates a crash mid-append: the temp file was written but the
        // rename never happened. The previously acknowledged state is intact.
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();

        let batch = make_batch(2);
        store.write_current(&batch).unwrap();
        std::fs::write(store.root().join("current.json.tmp"), b"{half a batc").unwrap();

        let report = recover(&store).unwrap();
        assert_eq!(report.removed_temp_files, 1);
        assert!(report.promoted_current);

        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        let recovered = store.read_batch(&pending[0]).unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered.batch_id, batch.batch_id);
    }

    #[test]
    fn test_recovery_on_clean_store_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();
        store.enqueue(&make_batch(1)).unwrap();

        let report = recover(&store).unwrap();
        assert!(!report.promoted_current);
        assert_eq!(report.quarantined, 0);
        assert_eq!(report.removed_temp_files, 0);
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }
}
