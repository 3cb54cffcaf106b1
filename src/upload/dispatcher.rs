use crate::queue::store::{PendingEntry, QueueStore, StoreError};
use crate::status::StatusReporter;
use crate::upload::backoff::RetryPolicy;
use crate::upload::client::{requests_for_batch, IngestSender, SendOutcome};
use crate::upload::network::NetworkMonitor;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of a triggered dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The device has not paired yet; skipped silently.
    SkippedUnpaired,
    /// The network monitor reported unreachable; skipped silently.
    SkippedOffline,
    /// Another pass was in flight; a rerun was requested instead.
    AlreadyRunning,
    Completed(PassSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub uploaded: usize,
    pub transient_failures: usize,
    pub terminal_failures: usize,
    pub skipped_backoff: usize,
    /// Connectivity was lost mid-pass and the rest of the queue was left
    /// untouched to preserve ordering.
    pub aborted_offline: bool,
}

/// Single-flight worker draining pending batches oldest-first.
///
/// Concurrent triggers coalesce: while a pass is running, any further trigger
/// sets a rerun flag that is consumed right after the pass completes, so
/// callers never queue up more than one extra pass.
pub struct UploadDispatcher {
    store: QueueStore,
    /// None until the device pairs; passes are skipped without it.
    sender: Option<Arc<dyn IngestSender>>,
    network: Arc<dyn NetworkMonitor>,
    policy: RetryPolicy,
    reporter: Arc<StatusReporter>,
    in_flight: AtomicBool,
    rerun_requested: AtomicBool,
}

impl UploadDispatcher {
    pub fn new(
        store: QueueStore,
        sender: Option<Arc<dyn IngestSender>>,
        network: Arc<dyn NetworkMonitor>,
        policy: RetryPolicy,
        reporter: Arc<StatusReporter>,
    ) -> Self {
        Self {
            store,
            sender,
            network,
            policy,
            reporter,
            in_flight: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
        }
    }

    /// Runs a processing pass unless one is already in flight, in which case
    /// the request is coalesced into a rerun after the current pass.
    pub async fn trigger(&self) -> PassOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.rerun_requested.store(true, Ordering::Release);
            return PassOutcome::AlreadyRunning;
        }

        let outcome = loop {
            let outcome = self.run_pass().await;
            if !self.rerun_requested.swap(false, Ordering::AcqRel) {
                break outcome;
            }
            debug!("Coalesced sync request, running another pass");
        };

        self.in_flight.store(false, Ordering::Release);
        outcome
    }

    async fn run_pass(&self) -> PassOutcome {
        let sender = match &self.sender {
            Some(sender) => Arc::clone(sender),
            None => {
                debug!("Skipping upload pass, device not paired");
                return PassOutcome::SkippedUnpaired;
            }
        };

        if !self.network.is_reachable().await {
            debug!("Skipping upload pass, network unreachable");
            return PassOutcome::SkippedOffline;
        }

        let entries = match self.store.list_pending() {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "Failed to list pending queue");
                return PassOutcome::Completed(PassSummary::default());
            }
        };

        let mut summary = PassSummary::default();

        for entry in entries {
            if self.process_entry(&sender, &entry, &mut summary).await {
                break;
            }
        }

        if summary.uploaded > 0 || summary.transient_failures > 0 || summary.terminal_failures > 0
        {
            info!(
                uploaded = summary.uploaded,
                transient = summary.transient_failures,
                terminal = summary.terminal_failures,
                skipped_backoff = summary.skipped_backoff,
                aborted_offline = summary.aborted_offline,
                "Upload pass complete"
            );
        }

        self.write_status();
        PassOutcome::Completed(summary)
    }

    /// Processes one pending batch. Returns true when the pass must stop
    /// (connectivity lost), so the remaining queue keeps its order.
    async fn process_entry(
        &self,
        sender: &Arc<dyn IngestSender>,
        entry: &PendingEntry,
        summary: &mut PassSummary,
    ) -> bool {
        let now = Utc::now();

        let mut batch = match self.store.read_batch(entry) {
            Ok(batch) => batch,
            Err(StoreError::Json(e)) => {
                // Outbound decode failure is terminal; keep the bytes
                warn!(file = %entry.file_name, error = %e, "Pending batch unreadable, quarantining");
                if let Err(e) = self.store.quarantine_corrupt(&entry.path) {
                    error!(file = %entry.file_name, error = %e, "Quarantine failed");
                }
                self.reporter
                    .record_failure(now, format!("corrupt batch file {}", entry.file_name));
                summary.terminal_failures += 1;
                return false;
            }
            Err(e) => {
                error!(file = %entry.file_name, error = %e, "Failed to read pending batch");
                return false;
            }
        };

        // Retry budget spent: terminal
        if self.policy.attempts_exhausted(batch.retry_count) {
            warn!(
                batch_id = %batch.batch_id,
                retry_count = batch.retry_count,
                max_attempts = self.policy.max_attempts(),
                "Batch exhausted retry budget, moving to failed"
            );
            if let Err(e) = self.store.move_to_failed(entry) {
                error!(batch_id = %batch.batch_id, error = %e, "Move to failed directory failed");
            }
            self.reporter.record_failure(
                now,
                format!("batch {} exceeded max retries", batch.batch_id),
            );
            summary.terminal_failures += 1;
            return false;
        }

        // Still inside the backoff window: leave for a later pass
        if let Some(last_retry_at) = batch.last_retry_at {
            let delay = self.policy.delay(batch.retry_count);
            let ready_at = last_retry_at
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            if now < ready_at {
                debug!(
                    batch_id = %batch.batch_id,
                    retry_count = batch.retry_count,
                    ready_at = %ready_at,
                    "Batch still backing off"
                );
                summary.skipped_backoff += 1;
                return false;
            }
        }

        match self.send_batch(sender, &batch).await {
            SendOutcome::Accepted => {
                if let Err(e) = self.store.delete(entry) {
                    error!(batch_id = %batch.batch_id, error = %e, "Delete after upload failed");
                }
                info!(
                    batch_id = %batch.batch_id,
                    signals = batch.len(),
                    "Batch delivered"
                );
                self.reporter.record_success(now);
                summary.uploaded += 1;
            }
            SendOutcome::Rejected { status } => {
                // Client error: terminal, no retry, retry_count untouched
                warn!(
                    batch_id = %batch.batch_id,
                    status = status,
                    "Batch rejected by server, moving to failed"
                );
                if let Err(e) = self.store.move_to_failed(entry) {
                    error!(batch_id = %batch.batch_id, error = %e, "Move to failed directory failed");
                }
                self.reporter
                    .record_failure(now, format!("batch {}: HTTP {}", batch.batch_id, status));
                summary.terminal_failures += 1;
            }
            SendOutcome::Transient { reason } => {
                batch.mark_attempt_failed(now);
                if let Err(e) = self.store.update_retry_state(&batch) {
                    error!(batch_id = %batch.batch_id, error = %e, "Retry state update failed");
                }
                warn!(
                    batch_id = %batch.batch_id,
                    retry_count = batch.retry_count,
                    reason = %reason,
                    "Transient delivery failure"
                );
                self.reporter
                    .record_failure(now, format!("batch {}: {}", batch.batch_id, reason));
                summary.transient_failures += 1;

                // A connection-level failure may mean the network is gone;
                // stop the pass rather than skipping ahead in the queue
                if reason.is_connection_level() && !self.network.is_reachable().await {
                    warn!("Connectivity lost mid-pass, stopping queue processing");
                    summary.aborted_offline = true;
                    return true;
                }
            }
        }

        false
    }

    /// A batch with several streams becomes several POSTs; the batch counts
    /// as delivered only when every stream group is accepted.
    async fn send_batch(
        &self,
        sender: &Arc<dyn IngestSender>,
        batch: &crate::queue::batch::SignalBatch,
    ) -> SendOutcome {
        for request in requests_for_batch(batch) {
            match sender.send(&request).await {
                SendOutcome::Accepted => continue,
                other => return other,
            }
        }
        SendOutcome::Accepted
    }

    fn write_status(&self) {
        match self.store.stats() {
            Ok(stats) => {
                if let Err(e) = self.reporter.write(&stats, true) {
                    warn!(error = %e, "Status file write failed");
                }
            }
            Err(e) => warn!(error = %e, "Queue stats unavailable for status file"),
        }
    }
}
