use chrono::Utc;
use courier::config::types::FlushConfig;
use courier::queue::accumulator::BatchAccumulator;
use courier::queue::batch::{Signal, SignalBatch};
use courier::queue::recovery;
use courier::queue::store::QueueStore;
use courier::queue::sweeper::{self, SweepPolicy};
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn flush_config(max_signals: usize) -> FlushConfig {
    FlushConfig {
        max_signals,
        max_age: Duration::from_secs(3600),
    }
}

fn make_signal(n: usize) -> Signal {
    Signal::new("location", serde_json::json!({ "lat": 37.0, "n": n }))
}

#[test]
fn test_size_threshold_seals_exactly_one_batch() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path().join("queue")).unwrap();
    let mut acc = BatchAccumulator::new(store.clone(), "dev-1", flush_config(5)).unwrap();

    for i in 0..5 {
        acc.append(make_signal(i)).unwrap();
    }
    assert!(acc.should_flush(Utc::now()));

    let entry = acc.flush().unwrap().expect("batch sealed");
    let sealed = store.read_batch(&entry).unwrap();
    assert_eq!(sealed.len(), 5);

    assert_eq!(store.list_pending().unwrap().len(), 1);
    assert_eq!(acc.current_len(), 0);
    assert!(store.read_current().unwrap().unwrap().is_empty());
}

#[test]
fn test_at_most_one_mutable_batch_exists() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path().join("queue")).unwrap();
    let mut acc = BatchAccumulator::new(store.clone(), "dev-1", flush_config(2)).unwrap();

    // Across repeated append/flush cycles the root never holds more than the
    // single current.json mutable file
    for i in 0..10 {
        acc.append(make_signal(i)).unwrap();
        if acc.should_flush(Utc::now()) {
            acc.flush().unwrap();
        }

        let mutable_files: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .collect();
        assert_eq!(mutable_files.len(), 1);
        assert_eq!(
            mutable_files[0].file_name().to_string_lossy(),
            "current.json"
        );
    }

    assert_eq!(store.list_pending().unwrap().len(), 5);
}

#[test]
fn test_crash_before_rename_preserves_acknowledged_state() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path().join("queue")).unwrap();

    {
        let mut acc = BatchAccumulator::new(store.clone(), "dev-1", flush_config(100)).unwrap();
        acc.append(make_signal(0)).unwrap();
        acc.append(make_signal(1)).unwrap();
        acc.append(make_signal(2)).unwrap();
    }

    // Simulate a crash mid-append: a partial temp file exists, the rename
    // never happened
    std::fs::write(store.root().join("current.json.tmp"), b"{\"signals\": [tru").unwrap();

    let report = recovery::recover(&store).unwrap();
    assert_eq!(report.removed_temp_files, 1);
    assert!(report.promoted_current);

    // The three acknowledged appends all survived
    let pending = store.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(store.read_batch(&pending[0]).unwrap().len(), 3);

    // And nothing corrupt is readable anywhere
    for entry in store.list_pending().unwrap() {
        store.read_batch(&entry).unwrap();
    }
    assert!(store.list_failed().unwrap().is_empty());
}

#[test]
fn test_recovery_then_accumulator_starts_fresh() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path().join("queue")).unwrap();

    {
        let mut acc = BatchAccumulator::new(store.clone(), "dev-1", flush_config(100)).unwrap();
        acc.append(make_signal(0)).unwrap();
    }

    recovery::recover(&store).unwrap();

    // Recovery promoted the interrupted batch; the next accumulator starts
    // with a new empty current
    let acc = BatchAccumulator::new(store.clone(), "dev-1", flush_config(100)).unwrap();
    assert_eq!(acc.current_len(), 0);
    assert_eq!(store.list_pending().unwrap().len(), 1);
}

#[test]
fn test_emergency_cleanup_spares_pending_data() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path().join("queue")).unwrap();

    for _ in 0..50 {
        let mut batch = SignalBatch::new("dev-1");
        batch.signals.push(make_signal(0));
        let entry = store.enqueue(&batch).unwrap();
        store.move_to_failed(&entry).unwrap();
    }
    for _ in 0..10 {
        let mut batch = SignalBatch::new("dev-1");
        batch.signals.push(make_signal(0));
        store.enqueue(&batch).unwrap();
    }

    let policy = SweepPolicy {
        warning_bytes: 1,
        critical_bytes: 1,
        hard_limit_bytes: 1,
    };
    sweeper::sweep(&store, &policy, SystemTime::now()).unwrap();

    assert_eq!(store.list_failed().unwrap().len(), 0);
    assert_eq!(store.list_pending().unwrap().len(), 10);
}

#[test]
fn test_quarantined_files_survive_routine_sweeps() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path().join("queue")).unwrap();

    let bad = store
        .pending_dir()
        .join("batch-20260301T100000000Z-00000000-0000-0000-0000-000000000000.json");
    std::fs::write(&bad, b"{mangled").unwrap();
    recovery::recover(&store).unwrap();
    assert_eq!(store.list_failed().unwrap().len(), 1);

    // A fresh quarantined file outlives a normal-level sweep
    let policy = SweepPolicy {
        warning_bytes: u64::MAX,
        critical_bytes: u64::MAX,
        hard_limit_bytes: u64::MAX,
    };
    sweeper::sweep(&store, &policy, SystemTime::now()).unwrap();
    assert_eq!(store.list_failed().unwrap().len(), 1);
}
