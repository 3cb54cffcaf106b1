use crate::queue::batch::SignalBatch;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

pub const CURRENT_FILE: &str = "current.json";
pub const PENDING_DIR: &str = "pending";
pub const FAILED_DIR: &str = "failed";
pub const TMP_SUFFIX: &str = ".tmp";
pub const CORRUPT_SUFFIX: &str = ".corrupt";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to a sealed batch file in the pending directory.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub path: PathBuf,
    pub file_name: String,
}

impl PendingEntry {
    /// Creation timestamp decoded from the filename, without reading the file.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_created_at(&self.file_name)
    }
}

#[derive(Debug, Clone)]
pub struct FailedEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub current_signals: usize,
    pub pending_files: usize,
    pub pending_signals: usize,
    pub failed_files: usize,
    pub total_size_bytes: u64,
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Filesystem-backed persistent queue.
///
/// Layout under the root directory:
///   current.json   the single mutable batch
///   pending/       sealed batches awaiting delivery, FIFO by filename
///   failed/        terminal batches, retained for a bounded time
///
/// Atomic rename is the only state-transition primitive; the root must live
/// on a single filesystem volume.
#[derive(Debug, Clone)]
pub struct QueueStore {
    root: PathBuf,
}

impl QueueStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(PENDING_DIR))?;
        fs::create_dir_all(root.join(FAILED_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.root.join(PENDING_DIR)
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.root.join(FAILED_DIR)
    }

    // ===== current batch =====

    /// Persists the current batch. Durable before returning: the content is
    /// written to a temp file, synced, then renamed over the destination.
    pub fn write_current(&self, batch: &SignalBatch) -> Result<()> {
        atomic_write_json(&self.current_path(), batch)
    }

    pub fn read_current(&self) -> Result<Option<SignalBatch>> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let batch = serde_json::from_slice(&bytes)?;
        Ok(Some(batch))
    }

    pub fn clear_current(&self) -> Result<()> {
        let path = self.current_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Seals the current batch file into the pending directory via a single
    /// atomic rename. The caller must have persisted the final batch state
    /// with `write_current` first.
    pub fn promote_current(&self, batch: &SignalBatch) -> Result<PendingEntry> {
        let file_name = batch.file_name();
        let target = self.pending_dir().join(&file_name);
        fs::rename(self.current_path(), &target)?;
        Ok(PendingEntry {
            path: target,
            file_name,
        })
    }

    // ===== pending queue =====

    /// Writes a sealed batch directly into the pending directory.
    /// Never exposes a partial file: temp-write + fsync + rename.
    pub fn enqueue(&self, batch: &SignalBatch) -> Result<PendingEntry> {
        let file_name = batch.file_name();
        let target = self.pending_dir().join(&file_name);
        atomic_write_json(&target, batch)?;
        Ok(PendingEntry {
            path: target,
            file_name,
        })
    }

    /// Re-scans the pending directory and returns entries oldest-first.
    /// Restartable: every call reflects the directory as it is now.
    pub fn list_pending(&self) -> Result<Vec<PendingEntry>> {
        let re = batch_file_regex();
        let mut entries = Vec::new();

        for dir_entry in fs::read_dir(self.pending_dir())? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name().to_string_lossy().to_string();
            if !re.is_match(&file_name) {
                continue;
            }
            entries.push(PendingEntry {
                path: dir_entry.path(),
                file_name,
            });
        }

        // Filenames encode creation time, so a lexicographic sort is FIFO
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    pub fn read_batch(&self, entry: &PendingEntry) -> Result<SignalBatch> {
        let bytes = fs::read(&entry.path)?;
        let batch = serde_json::from_slice(&bytes)?;
        Ok(batch)
    }

    /// Rewrites a pending batch in place after a failed send. This is the one
    /// permitted mutation of a sealed batch (retry_count / last_retry_at) and
    /// goes through the same rewrite-then-rename path as every other write.
    pub fn update_retry_state(&self, batch: &SignalBatch) -> Result<()> {
        let target = self.pending_dir().join(batch.file_name());
        atomic_write_json(&target, batch)
    }

    pub fn delete(&self, entry: &PendingEntry) -> Result<()> {
        fs::remove_file(&entry.path)?;
        Ok(())
    }

    // ===== failed queue =====

    /// Moves a pending batch into the failed directory. On a name collision
    /// the new arrival gets a timestamp suffix rather than overwriting.
    pub fn move_to_failed(&self, entry: &PendingEntry) -> Result<PathBuf> {
        let target = self.collision_free_failed_path(&entry.file_name);
        fs::rename(&entry.path, &target)?;
        Ok(target)
    }

    /// Quarantines an unreadable file under failed/ with a `.corrupt` marker.
    /// Never deletes: the file is preserved for forensics.
    pub fn quarantine_corrupt(&self, path: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let target =
            self.collision_free_failed_path(&format!("{}{}", file_name, CORRUPT_SUFFIX));
        fs::rename(path, &target)?;
        Ok(target)
    }

    pub fn list_failed(&self) -> Result<Vec<FailedEntry>> {
        let mut entries = Vec::new();

        for dir_entry in fs::read_dir(self.failed_dir())? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name().to_string_lossy().to_string();
            if file_name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let metadata = dir_entry.metadata()?;
            entries.push(FailedEntry {
                path: dir_entry.path(),
                file_name,
                size: metadata.len(),
                modified: metadata.modified()?,
            });
        }

        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    pub fn delete_failed(&self, entry: &FailedEntry) -> Result<()> {
        fs::remove_file(&entry.path)?;
        Ok(())
    }

    // ===== statistics =====

    /// Total bytes across current, pending, and failed.
    pub fn total_size_bytes(&self) -> Result<u64> {
        let mut total = 0u64;

        let current = self.current_path();
        if current.exists() {
            total += fs::metadata(&current)?.len();
        }
        total += dir_size(&self.pending_dir())?;
        total += dir_size(&self.failed_dir())?;
        Ok(total)
    }

    /// Queue statistics for the sweeper and the status file. Counting pending
    /// signals reads each pending file; unreadable files are skipped here and
    /// left for recovery/dispatch to quarantine.
    pub fn stats(&self) -> Result<QueueStats> {
        let current_signals = match self.read_current() {
            Ok(Some(batch)) => batch.len(),
            Ok(None) | Err(StoreError::Json(_)) => 0,
            Err(e) => return Err(e),
        };

        let pending = self.list_pending()?;
        let pending_files = pending.len();
        let oldest_pending = pending.first().and_then(|e| e.created_at());

        let mut pending_signals = 0usize;
        for entry in &pending {
            if let Ok(batch) = self.read_batch(entry) {
                pending_signals += batch.len();
            }
        }

        let failed_files = self.list_failed()?.len();
        let total_size_bytes = self.total_size_bytes()?;

        Ok(QueueStats {
            current_signals,
            pending_files,
            pending_signals,
            failed_files,
            total_size_bytes,
            oldest_pending,
        })
    }

    fn collision_free_failed_path(&self, file_name: &str) -> PathBuf {
        let target = self.failed_dir().join(file_name);
        if !target.exists() {
            return target;
        }
        let suffix = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        self.failed_dir()
            .join(format!("{}.{}", file_name, suffix))
    }
}

/// Write-temp-then-rename. The rename is atomic on a POSIX filesystem, so a
/// reader never observes a partially written file; the fsync before the
/// rename makes the content durable before the new name appears.
fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "batch.json".to_string());
    let tmp = path.with_file_name(format!("{}{}", file_name, TMP_SUFFIX));

    let bytes = serde_json::to_vec_pretty(value)?;
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        total += entry.metadata()?.len();
    }
    Ok(total)
}

fn batch_file_regex() -> Regex {
    Regex::new(r"^batch-(\d{8}T\d{9}Z)-[0-9a-f-]{36}\.json$").unwrap()
}

fn parse_created_at(file_name: &str) -> Option<DateTime<Utc>> {
    let re = batch_file_regex();
    let caps = re.captures(file_name)?;
    let ts = caps.get(1)?.as_str();
    NaiveDateTime::parse_from_str(ts, "%Y%m%dT%H%M%S%3fZ")
        .ok()
        .map(|naive| naive.and_utc())
}
