use crate::config::types::IngestConfig;
use crate::queue::batch::SignalBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP client build failed: {0}")]
    Build(#[from] reqwest::Error),
}

/// How a delivery attempt ended, already classified for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// 2xx: the server accepted the upload.
    Accepted,
    /// 4xx: terminal client error, never retried.
    Rejected { status: u16 },
    /// 5xx, timeout, or connection failure: retried with backoff.
    Transient { reason: TransientReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    ServerError,
    Timeout,
    Connection,
}

impl std::fmt::Display for TransientReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransientReason::ServerError => write!(f, "server error"),
            TransientReason::Timeout => write!(f, "timeout"),
            TransientReason::Connection => write!(f, "connection lost"),
        }
    }
}

impl TransientReason {
    /// Connection-level failures warrant a reachability re-check mid-pass;
    /// an HTTP 5xx means the network itself is fine.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, TransientReason::Timeout | TransientReason::Connection)
    }
}

/// One upload request: a batch carries signals for potentially several
/// streams, and the ingest contract takes one stream per POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub stream_name: String,
    pub device_id: String,
    pub data: Vec<serde_json::Value>,
    pub batch_metadata: BatchMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub total_records: usize,
    pub app_version: String,
    /// Dedupe handle for the server; re-delivery after a lost response is
    /// possible, so the same batch_id can arrive twice.
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Splits a batch into per-stream ingest requests, preserving signal order
/// within each stream. Stream groups appear in first-seen order.
pub fn requests_for_batch(batch: &SignalBatch) -> Vec<IngestRequest> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<serde_json::Value>> = HashMap::new();

    for signal in &batch.signals {
        if !grouped.contains_key(&signal.stream) {
            order.push(signal.stream.clone());
        }
        let value = serde_json::to_value(signal).unwrap_or(serde_json::Value::Null);
        grouped.entry(signal.stream.clone()).or_default().push(value);
    }

    let app_version = batch
        .metadata
        .get("agent_version")
        .cloned()
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    order
        .into_iter()
        .map(|stream_name| {
            let data = grouped.remove(&stream_name).unwrap_or_default();
            IngestRequest {
                stream_name,
                device_id: batch.device_id.clone(),
                data,
                batch_metadata: BatchMetadata {
                    total_records: batch.len(),
                    app_version: app_version.clone(),
                    batch_id: batch.batch_id,
                    created_at: batch.created_at,
                },
            }
        })
        .collect()
}

/// Seam between the dispatcher and the wire, so tests can script outcomes.
#[async_trait]
pub trait IngestSender: Send + Sync {
    async fn send(&self, request: &IngestRequest) -> SendOutcome;
}

/// Production sender for the ingest HTTP contract.
pub struct HttpIngestClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpIngestClient {
    pub fn new(config: &IngestConfig, token: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/ingest", config.url.trim_end_matches('/')),
            token: token.into(),
        })
    }
}

#[async_trait]
impl IngestSender for HttpIngestClient {
    async fn send(&self, request: &IngestRequest) -> SendOutcome {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Device-Token", &self.token)
            .json(request)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                debug!(
                    stream = %request.stream_name,
                    records = request.data.len(),
                    status = status.as_u16(),
                    "Ingest response"
                );
                if status.is_success() {
                    SendOutcome::Accepted
                } else if status.is_client_error() {
                    SendOutcome::Rejected {
                        status: status.as_u16(),
                    }
                } else {
                    SendOutcome::Transient {
                        reason: TransientReason::ServerError,
                    }
                }
            }
            Err(e) if e.is_timeout() => SendOutcome::Transient {
                reason: TransientReason::Timeout,
            },
            Err(_) => SendOutcome::Transient {
                reason: TransientReason::Connection,
            },
        }
    }
}
