use crate::config::types::{Config, ProbeMode};
use crate::queue::accumulator::BatchAccumulator;
use crate::queue::batch::Signal;
use crate::queue::recovery;
use crate::queue::store::QueueStore;
use crate::queue::sweeper::{self, SweepPolicy};
use crate::status::StatusReporter;
use crate::upload::backoff::RetryPolicy;
use crate::upload::client::{HttpIngestClient, IngestSender};
use crate::upload::dispatcher::UploadDispatcher;
use crate::upload::network::{NetworkMonitor, StaticMonitor, TcpProbeMonitor};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RECORD_CHANNEL_CAPACITY: usize = 1024;
const SWEEP_STARTUP_DELAY: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Device ID stamped on batches created before the device pairs. Uploads do
/// not run until pairing, so these batches wait in the queue.
const UNPAIRED_DEVICE_ID: &str = "unpaired";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("queue store error: {0}")]
    Store(#[from] crate::queue::store::StoreError),

    #[error("ingest client error: {0}")]
    Client(#[from] crate::upload::client::ClientError),

    #[error("network monitor error: {0}")]
    Monitor(#[from] crate::upload::network::MonitorError),
}

/// Fire-and-forget handle given to collectors. Cloneable; dropping every
/// clone closes the intake channel.
#[derive(Clone)]
pub struct TelemetryProducer {
    tx: mpsc::Sender<Signal>,
}

impl TelemetryProducer {
    pub fn add_record(&self, stream: impl Into<String>, payload: serde_json::Value) {
        let signal = Signal::new(stream, payload);
        match self.tx.try_send(signal) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(signal)) => {
                warn!(stream = %signal.stream, "Intake channel full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                warn!(stream = %signal.stream, "Intake channel closed, dropping record");
            }
        }
    }
}

/// A running agent: the producer handle plus its background tasks.
pub struct AgentHandle {
    pub producer: TelemetryProducer,
    tasks: Vec<JoinHandle<()>>,
    store: QueueStore,
    reporter: Arc<StatusReporter>,
}

impl AgentHandle {
    /// Waits for every background task to finish, then marks the agent as
    /// stopped in the status file. Call after cancelling the token passed to
    /// `start`.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Agent task join error");
            }
        }

        match self.store.stats() {
            Ok(stats) => {
                if let Err(e) = self.reporter.write(&stats, false) {
                    warn!(error = %e, "Final status write failed");
                }
            }
            Err(e) => warn!(error = %e, "Queue stats unavailable for final status"),
        }
    }
}

/// Composition root. Everything is explicitly constructed and injected here;
/// there are no process-wide singletons.
pub struct AgentRunner {
    config: Config,
}

impl AgentRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn start(self, cancel: CancellationToken) -> Result<AgentHandle, AgentError> {
        let config = self.config;

        info!(queue_path = %config.queue.path.display(), "Starting telemetry agent");

        let store = QueueStore::open(&config.queue.path)?;

        // Recovery runs before anything else touches the store
        recovery::recover(&store)?;

        let status_path = config
            .status
            .path
            .clone()
            .unwrap_or_else(|| config.queue.path.join("status.json"));
        let reporter = Arc::new(StatusReporter::new(status_path));

        let device_id = config
            .device
            .as_ref()
            .map(|d| d.device_id.clone())
            .unwrap_or_else(|| UNPAIRED_DEVICE_ID.to_string());

        let accumulator = Arc::new(Mutex::new(BatchAccumulator::new(
            store.clone(),
            device_id,
            config.queue.flush.clone(),
        )?));

        let network: Arc<dyn NetworkMonitor> = match config.network.probe {
            ProbeMode::Tcp => Arc::new(TcpProbeMonitor::from_url(
                &config.ingest.url,
                config.network.probe_timeout,
            )?),
            ProbeMode::AssumeOnline => Arc::new(StaticMonitor::new(true)),
        };

        let sender: Option<Arc<dyn IngestSender>> = match &config.device {
            Some(device) => {
                let client = HttpIngestClient::new(&config.ingest, device.token.clone())?;
                Some(Arc::new(client))
            }
            None => {
                info!("Device not paired, uploads disabled until pairing");
                None
            }
        };

        let dispatcher = Arc::new(UploadDispatcher::new(
            store.clone(),
            sender,
            network,
            RetryPolicy::from_config(&config.queue.retry),
            Arc::clone(&reporter),
        ));

        let sync_notify = Arc::new(Notify::new());
        let (record_tx, record_rx) = mpsc::channel::<Signal>(RECORD_CHANNEL_CAPACITY);

        let mut tasks = Vec::new();

        info!("Starting intake task");
        tasks.push(tokio::spawn(run_intake(
            record_rx,
            Arc::clone(&accumulator),
            Arc::clone(&sync_notify),
            cancel.clone(),
        )));

        info!("Starting age-check task");
        tasks.push(tokio::spawn(run_age_check(
            Arc::clone(&accumulator),
            Arc::clone(&sync_notify),
            config.sync.age_check_interval,
            cancel.clone(),
        )));

        info!("Starting upload task");
        tasks.push(tokio::spawn(run_upload(
            Arc::clone(&accumulator),
            Arc::clone(&dispatcher),
            Arc::clone(&sync_notify),
            config.sync.interval,
            cancel.clone(),
        )));

        info!("Starting heartbeat task");
        tasks.push(tokio::spawn(run_heartbeat(
            store.clone(),
            Arc::clone(&reporter),
            config.status.heartbeat_interval,
            cancel.clone(),
        )));

        info!("Starting maintenance task");
        tasks.push(tokio::spawn(run_maintenance(
            store.clone(),
            SweepPolicy::from_config(&config.maintenance),
            cancel.clone(),
        )));

        Ok(AgentHandle {
            producer: TelemetryProducer { tx: record_tx },
            tasks,
            store,
            reporter,
        })
    }
}

/// Consumes records from collectors, appends them to the current batch, and
/// seals the batch as soon as the size trigger fires.
async fn run_intake(
    mut record_rx: mpsc::Receiver<Signal>,
    accumulator: Arc<Mutex<BatchAccumulator>>,
    sync_notify: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => break,
            signal = record_rx.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        let flushed = {
            let mut acc = accumulator.lock().await;
            if let Err(e) = acc.append(signal) {
                error!(error = %e, "Append failed, record lost");
                continue;
            }

            if acc.should_flush(chrono::Utc::now()) {
                match acc.flush() {
                    Ok(entry) => entry.is_some(),
                    Err(e) => {
                        error!(error = %e, "Flush failed");
                        false
                    }
                }
            } else {
                false
            }
        };

        if flushed {
            sync_notify.notify_one();
        }
    }
}

/// Periodic age trigger: a batch that has been open too long is sealed even
/// if it never filled up.
async fn run_age_check(
    accumulator: Arc<Mutex<BatchAccumulator>>,
    sync_notify: Arc<Notify>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let flushed = {
            let mut acc = accumulator.lock().await;
            if acc.should_flush(chrono::Utc::now()) {
                match acc.flush() {
                    Ok(entry) => entry.is_some(),
                    Err(e) => {
                        error!(error = %e, "Age-triggered flush failed");
                        false
                    }
                }
            } else {
                false
            }
        };

        if flushed {
            sync_notify.notify_one();
        }
    }
}

/// Drains the pending queue on the sync schedule and whenever a new batch is
/// sealed. A forced sync flushes the current batch first so fresh signals
/// ride along.
async fn run_upload(
    accumulator: Arc<Mutex<BatchAccumulator>>,
    dispatcher: Arc<UploadDispatcher>,
    sync_notify: Arc<Notify>,
    sync_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sync_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so startup isn't a sync storm
    ticker.tick().await;

    loop {
        let forced = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => true,
            _ = sync_notify.notified() => false,
        };

        if forced {
            let mut acc = accumulator.lock().await;
            if let Err(e) = acc.flush() {
                error!(error = %e, "Sync-triggered flush failed");
            }
        }

        dispatcher.trigger().await;
    }
}

async fn run_heartbeat(
    store: QueueStore,
    reporter: Arc<StatusReporter>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match store.stats() {
            Ok(stats) => {
                if let Err(e) = reporter.write(&stats, true) {
                    warn!(error = %e, "Heartbeat status write failed");
                }
            }
            Err(e) => warn!(error = %e, "Queue stats unavailable for heartbeat"),
        }
    }
}

/// One delayed startup sweep, then hourly.
async fn run_maintenance(store: QueueStore, policy: SweepPolicy, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(SWEEP_STARTUP_DELAY) => {}
    }

    loop {
        match sweeper::sweep(&store, &policy, SystemTime::now()) {
            Ok(report) => {
                if report.deleted_failed > 0 {
                    info!(
                        deleted = report.deleted_failed,
                        bytes = report.total_bytes_after,
                        "Maintenance sweep finished"
                    );
                }
            }
            Err(e) => error!(error = %e, "Maintenance sweep failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
        }
    }
}
