use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single telemetry record handed in by a collector. The payload is opaque
/// to the queue subsystem; it is serialized and delivered as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,

    /// Producer-chosen stream name (e.g. "location", "health", "app_focus").
    pub stream: String,

    pub recorded_at: DateTime<Utc>,

    pub payload: serde_json::Value,
}

impl Signal {
    pub fn new(stream: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream: stream.into(),
            recorded_at: Utc::now(),
            payload,
        }
    }
}

/// The unit of durability and delivery.
///
/// A batch is mutable only while it is the current batch; once sealed into
/// the pending directory the only permitted mutation is the retry bookkeeping
/// rewrite after a failed send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBatch {
    pub batch_id: Uuid,

    /// Owner device. Re-stamped on batches created after a re-pair; sealed
    /// batches keep the ID they were created under.
    pub device_id: String,

    /// Fixes FIFO order; also encoded into the batch filename.
    pub created_at: DateTime<Utc>,

    pub signals: Vec<Signal>,

    /// Monotonically non-decreasing count of failed delivery attempts.
    pub retry_count: u32,

    pub last_retry_at: Option<DateTime<Utc>>,

    /// Host/runtime diagnostics stamped at creation.
    pub metadata: HashMap<String, String>,
}

impl SignalBatch {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            device_id: device_id.into(),
            created_at: Utc::now(),
            signals: Vec::new(),
            retry_count: 0,
            last_retry_at: None,
            metadata: host_metadata(),
        }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Records a failed delivery attempt. The caller persists the batch
    /// afterwards via the store's atomic retry-state rewrite.
    pub fn mark_attempt_failed(&mut self, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_retry_at = Some(now);
    }

    /// Filename stem encoding creation order: a lexicographic sort of batch
    /// filenames yields FIFO order without reading file contents.
    pub fn file_stem(&self) -> String {
        format!(
            "batch-{}-{}",
            self.created_at.format("%Y%m%dT%H%M%S%3fZ"),
            self.batch_id
        )
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.file_stem())
    }
}

fn host_metadata() -> HashMap<String, String> {
    let mut metadata = HashMap::new();

    let host = hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    metadata.insert("hostname".to_string(), host);
    metadata.insert(
        "agent_version".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    metadata.insert("os".to_string(), std::env::consts::OS.to_string());
    metadata
}
