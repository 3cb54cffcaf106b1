pub mod backoff;
pub mod client;
pub mod dispatcher;
pub mod network;

pub use backoff::RetryPolicy;
pub use client::{HttpIngestClient, IngestSender, SendOutcome};
pub use dispatcher::{PassOutcome, UploadDispatcher};
pub use network::{NetworkMonitor, StaticMonitor, TcpProbeMonitor};
