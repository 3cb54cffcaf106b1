use crate::config::types::FlushConfig;
use crate::queue::batch::{Signal, SignalBatch};
use crate::queue::store::{PendingEntry, QueueStore, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Owns the single mutable batch. Every mutation is persisted synchronously
/// before the call returns, so an acknowledged append survives a crash.
///
/// Not internally synchronized: the queue manager serializes access behind
/// one async mutex.
pub struct BatchAccumulator {
    store: QueueStore,
    device_id: String,
    flush: FlushConfig,
    current: SignalBatch,
}

impl BatchAccumulator {
    /// Adopts an existing current batch if one is on disk (recovery leaves
    /// none behind, but a clean restart finds the previous current), and
    /// otherwise creates a fresh empty one.
    pub fn new(store: QueueStore, device_id: impl Into<String>, flush: FlushConfig) -> Result<Self> {
        let device_id = device_id.into();

        let current = match store.read_current()? {
            Some(batch) => {
                debug!(
                    batch_id = %batch.batch_id,
                    signals = batch.len(),
                    "Adopted existing current batch"
                );
                batch
            }
            None => {
                let batch = SignalBatch::new(device_id.clone());
                store.write_current(&batch)?;
                batch
            }
        };

        Ok(Self {
            store,
            device_id,
            flush,
            current,
        })
    }

    /// Appends a signal to the current batch and persists it atomically
    /// before returning.
    pub fn append(&mut self, signal: Signal) -> Result<()> {
        self.current.signals.push(signal);
        self.store.write_current(&self.current)
    }

    /// Size and age triggers are independent; either one is enough.
    /// An empty batch never wants flushing.
    pub fn should_flush(&self, now: DateTime<Utc>) -> bool {
        if self.current.is_empty() {
            return false;
        }

        if self.current.len() >= self.flush.max_signals {
            return true;
        }

        match chrono::Duration::from_std(self.flush.max_age) {
            Ok(max_age) => self.current.age(now) >= max_age,
            Err(_) => false,
        }
    }

    /// Seals the current batch into the pending queue and replaces it with a
    /// fresh empty one. A no-op on an empty batch.
    pub fn flush(&mut self) -> Result<Option<PendingEntry>> {
        if self.current.is_empty() {
            return Ok(None);
        }

        // Persist final state, then a single atomic rename seals the batch
        self.store.write_current(&self.current)?;
        let entry = self.store.promote_current(&self.current)?;

        info!(
            batch_id = %self.current.batch_id,
            signals = self.current.len(),
            file = %entry.file_name,
            "Sealed batch into pending queue"
        );

        self.current = SignalBatch::new(self.device_id.clone());
        self.store.write_current(&self.current)?;

        Ok(Some(entry))
    }

    /// Applied when the device re-pairs. Takes effect on the current batch
    /// and everything created after it; sealed batches keep their stamp.
    pub fn set_device_id(&mut self, device_id: impl Into<String>) -> Result<()> {
        self.device_id = device_id.into();
        self.current.device_id = self.device_id.clone();
        self.store.write_current(&self.current)
    }

    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    pub fn current_batch_id(&self) -> uuid::Uuid {
        self.current.batch_id
    }
}
