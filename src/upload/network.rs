use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid ingest URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

/// Reports whether sending should be attempted. Checked before a dispatcher
/// pass starts and re-checked when a connection-level failure occurs
/// mid-pass.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probes the ingest endpoint's TCP port with a short timeout. A refused or
/// timed-out connect means the pass is skipped rather than burning retry
/// budget on every pending batch.
pub struct TcpProbeMonitor {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbeMonitor {
    pub fn from_url(url: &str, timeout: Duration) -> Result<Self, MonitorError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| MonitorError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| MonitorError::InvalidUrl {
                url: url.to_string(),
                message: "missing host".to_string(),
            })?
            .to_string();

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| MonitorError::InvalidUrl {
                url: url.to_string(),
                message: "unknown scheme, cannot determine port".to_string(),
            })?;

        Ok(Self {
            host,
            port,
            timeout,
        })
    }
}

#[async_trait]
impl NetworkMonitor for TcpProbeMonitor {
    async fn is_reachable(&self) -> bool {
        let address = (self.host.as_str(), self.port);
        let connect = tokio::net::TcpStream::connect(address);

        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(host = %self.host, port = self.port, error = %e, "Network probe failed");
                false
            }
            Err(_) => {
                debug!(host = %self.host, port = self.port, "Network probe timed out");
                false
            }
        }
    }
}

/// Fixed-answer monitor: the `assume_online` config mode, and a switchable
/// stand-in for tests.
pub struct StaticMonitor {
    online: AtomicBool,
}

impl StaticMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}

#[async_trait]
impl NetworkMonitor for StaticMonitor {
    async fn is_reachable(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_extracts_host_and_default_port() {
        let monitor =
            TcpProbeMonitor::from_url("https://ingest.example.com", Duration::from_secs(1))
                .unwrap();
        assert_eq!(monitor.host, "ingest.example.com");
        assert_eq!(monitor.port, 443);

        let monitor =
            TcpProbeMonitor::from_url("http://ingest.example.com:8080/path", Duration::from_secs(1))
                .unwrap();
        assert_eq!(monitor.port, 8080);
    }

    #[test]
    fn test_from_url_rejects_garbage() {
        assert!(TcpProbeMonitor::from_url("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_static_monitor_flips() {
        let monitor = StaticMonitor::new(true);
        assert!(monitor.is_reachable().await);
        monitor.set_online(false);
        assert!(!monitor.is_reachable().await);
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable_for_closed_port() {
        // Port 1 on localhost is almost certainly closed; either a refused
        // connect or the timeout counts as unreachable
        let monitor =
            TcpProbeMonitor::from_url("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        assert!(!monitor.is_reachable().await);
    }
}
