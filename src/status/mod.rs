use crate::queue::store::QueueStats;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("status serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StatusError>;

/// Contents of the status file consumed by external monitoring and the
/// `status` CLI subcommand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub agent_running: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub current_signals: usize,
    pub pending_files: usize,
    pub pending_signals: usize,
    pub failed_files: usize,
    pub total_size_mb: f64,
    pub oldest_pending: Option<DateTime<Utc>>,
    pub last_successful_upload: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub upload_success_rate_24h: Option<f64>,
}

struct ReporterInner {
    /// Rolling window of (when, succeeded) delivery attempts, pruned to 24h.
    /// In-memory only: the rate resets on agent restart.
    window: VecDeque<(DateTime<Utc>, bool)>,
    last_successful_upload: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Tracks delivery outcomes and writes the status file. Shared between the
/// dispatcher (after each pass) and the heartbeat task.
pub struct StatusReporter {
    path: PathBuf,
    inner: Mutex<ReporterInner>,
}

impl StatusReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(ReporterInner {
                window: VecDeque::new(),
                last_successful_upload: None,
                last_error: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_success(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.window.push_back((now, true));
        inner.last_successful_upload = Some(now);
        inner.last_error = None;
        prune_window(&mut inner.window, now);
    }

    pub fn record_failure(&self, now: DateTime<Utc>, error: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.window.push_back((now, false));
        inner.last_error = Some(error.into());
        prune_window(&mut inner.window, now);
    }

    /// Fraction of delivery attempts in the last 24h that succeeded.
    /// None when there were no attempts.
    pub fn success_rate_24h(&self, now: DateTime<Utc>) -> Option<f64> {
        let mut inner = self.inner.lock().unwrap();
        prune_window(&mut inner.window, now);

        if inner.window.is_empty() {
            return None;
        }
        let successes = inner.window.iter().filter(|(_, ok)| *ok).count();
        Some(successes as f64 / inner.window.len() as f64)
    }

    pub fn snapshot(&self, stats: &QueueStats, agent_running: bool) -> StatusSnapshot {
        let now = Utc::now();
        let rate = self.success_rate_24h(now);
        let inner = self.inner.lock().unwrap();

        StatusSnapshot {
            agent_running,
            last_heartbeat: now,
            current_signals: stats.current_signals,
            pending_files: stats.pending_files,
            pending_signals: stats.pending_signals,
            failed_files: stats.failed_files,
            total_size_mb: stats.total_size_bytes as f64 / (1024.0 * 1024.0),
            oldest_pending: stats.oldest_pending,
            last_successful_upload: inner.last_successful_upload,
            last_error: inner.last_error.clone(),
            upload_success_rate_24h: rate,
        }
    }

    /// Writes the status file atomically (temp + rename), same discipline as
    /// the queue files.
    pub fn write(&self, stats: &QueueStats, agent_running: bool) -> Result<()> {
        let snapshot = self.snapshot(stats, agent_running);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn prune_window(window: &mut VecDeque<(DateTime<Utc>, bool)>, now: DateTime<Utc>) {
    let cutoff = now - Duration::hours(24);
    while let Some((ts, _)) = window.front() {
        if *ts < cutoff {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Loads a status file written by a (possibly still running) agent.
pub fn read_status(path: &Path) -> Result<StatusSnapshot> {
    let bytes = fs::read(path)?;
    let snapshot = serde_json::from_slice(&bytes)?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stats() -> QueueStats {
        QueueStats {
            current_signals: 2,
            pending_files: 1,
            pending_signals: 5,
            failed_files: 0,
            total_size_bytes: 2 * 1024 * 1024,
            oldest_pending: None,
        }
    }

    #[test]
    fn test_success_rate_counts_last_24h() {
        let reporter = StatusReporter::new("/tmp/unused-status.json");
        let now = Utc::now();

        assert_eq!(reporter.success_rate_24h(now), None);

        reporter.record_success(now);
        reporter.record_success(now);
        reporter.record_failure(now, "HTTP 500");
        reporter.record_success(now);

        assert_eq!(reporter.success_rate_24h(now), Some(0.75));
    }

    #[test]
    fn test_success_rate_forgets_old_attempts() {
        let reporter = StatusReporter::new("/tmp/unused-status.json");
        let yesterday = Utc::now() - Duration::hours(30);

        reporter.record_failure(yesterday, "HTTP 503");

        let now = Utc::now();
        reporter.record_success(now);
        assert_eq!(reporter.success_rate_24h(now), Some(1.0));
    }

    #[test]
    fn test_success_clears_last_error() {
        let reporter = StatusReporter::new("/tmp/unused-status.json");
        let now = Utc::now();

        reporter.record_failure(now, "HTTP 500");
        let snap = reporter.snapshot(&stats(), true);
        assert_eq!(snap.last_error.as_deref(), Some("HTTP 500"));

        reporter.record_success(now);
        let snap = reporter.snapshot(&stats(), true);
        assert!(snap.last_error.is_none());
        assert!(snap.last_successful_upload.is_some());
    }

    #[test]
    fn test_write_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        let reporter = StatusReporter::new(&path);

        reporter.record_success(Utc::now());
        reporter.write(&stats(), true).unwrap();

        let snapshot = read_status(&path).unwrap();
        assert!(snapshot.agent_running);
        assert_eq!(snapshot.pending_signals, 5);
        assert_eq!(snapshot.total_size_mb, 2.0);
        assert_eq!(snapshot.upload_success_rate_24h, Some(1.0));
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        let reporter = StatusReporter::new(&path);
        reporter.write(&stats(), true).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
