use crate::config::types::MaintenanceConfig;
use crate::queue::store::{QueueStore, Result};
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

const ROUTINE_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);
const AGGRESSIVE_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepLevel {
    Normal,
    Warning,
    Critical,
    HardLimit,
}

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    pub warning_bytes: u64,
    pub critical_bytes: u64,
    pub hard_limit_bytes: u64,
}

impl SweepPolicy {
    pub fn from_config(config: &MaintenanceConfig) -> Self {
        Self {
            warning_bytes: config.warning_mb * 1024 * 1024,
            critical_bytes: config.critical_mb * 1024 * 1024,
            hard_limit_bytes: config.hard_limit_mb * 1024 * 1024,
        }
    }

    fn classify(&self, total_bytes: u64) -> SweepLevel {
        if total_bytes > self.hard_limit_bytes {
            SweepLevel::HardLimit
        } else if total_bytes > self.critical_bytes {
            SweepLevel::Critical
        } else if total_bytes > self.warning_bytes {
            SweepLevel::Warning
        } else {
            SweepLevel::Normal
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub level: SweepLevel,
    pub total_bytes_before: u64,
    pub total_bytes_after: u64,
    pub deleted_failed: usize,
}

/// One maintenance pass over the queue.
///
/// Failed (terminal) data is the only thing maintenance ever deletes.
/// Pending batches hold undelivered data and are left alone even under the
/// hard limit; if purging every failed file is not enough, the pass logs an
/// escalation and stops.
pub fn sweep(store: &QueueStore, policy: &SweepPolicy, now: SystemTime) -> Result<SweepReport> {
    let total_bytes_before = store.total_size_bytes()?;
    let level = policy.classify(total_bytes_before);

    let deleted_failed = match level {
        SweepLevel::Normal => delete_failed_older_than(store, now, ROUTINE_MAX_AGE)?,
        SweepLevel::Warning => {
            warn!(
                total_bytes = total_bytes_before,
                warning_bytes = policy.warning_bytes,
                "Queue size above warning threshold"
            );
            0
        }
        SweepLevel::Critical => {
            warn!(
                total_bytes = total_bytes_before,
                critical_bytes = policy.critical_bytes,
                "Queue size above critical threshold, purging failed files older than one day"
            );
            delete_failed_older_than(store, now, AGGRESSIVE_MAX_AGE)?
        }
        SweepLevel::HardLimit => {
            warn!(
                total_bytes = total_bytes_before,
                hard_limit_bytes = policy.hard_limit_bytes,
                "Queue size above hard limit, purging all failed files"
            );
            delete_all_failed(store)?
        }
    };

    let total_bytes_after = store.total_size_bytes()?;

    if level == SweepLevel::HardLimit && total_bytes_after > policy.hard_limit_bytes {
        // Everything left is pending (undelivered) data; never auto-deleted
        error!(
            total_bytes = total_bytes_after,
            hard_limit_bytes = policy.hard_limit_bytes,
            "Queue still over hard limit after purging failed data, manual intervention required"
        );
    }

    if deleted_failed > 0 {
        info!(
            deleted_failed = deleted_failed,
            total_bytes = total_bytes_after,
            "Maintenance sweep removed failed files"
        );
    }

    Ok(SweepReport {
        level,
        total_bytes_before,
        total_bytes_after,
        deleted_failed,
    })
}

fn delete_failed_older_than(
    store: &QueueStore,
    now: SystemTime,
    max_age: Duration,
) -> Result<usize> {
    let mut deleted = 0;
    for entry in store.list_failed()? {
        let age = now
            .duration_since(entry.modified)
            .unwrap_or(Duration::ZERO);
        if age > max_age {
            store.delete_failed(&entry)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

fn delete_all_failed(store: &QueueStore) -> Result<usize> {
    let mut deleted = 0;
    for entry in store.list_failed()? {
        store.delete_failed(&entry)?;
        deleted += 1;
    }
    Ok(deleted)
}
