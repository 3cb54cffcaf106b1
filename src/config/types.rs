use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pairing state. Absent until the device has paired with the server;
    /// the dispatcher skips upload passes while this is missing.
    pub device: Option<DeviceConfig>,
    pub ingest: IngestConfig,
    pub queue: QueueConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub url: String,
    #[serde(default = "default_ingest_timeout", with = "duration_format")]
    pub timeout: Duration,
}

fn default_ingest_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Seal the current batch once it holds this many signals.
    #[serde(default = "default_max_signals")]
    pub max_signals: usize,
    /// Seal the current batch once it has been open this long.
    #[serde(default = "default_max_age", with = "duration_format")]
    pub max_age: Duration,
}

fn default_max_signals() -> usize {
    200
}

fn default_max_age() -> Duration {
    Duration::from_secs(300)
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            max_signals: default_max_signals(),
            max_age: default_max_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay", with = "duration_format")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "duration_format")]
    pub max_delay: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_warning_mb")]
    pub warning_mb: u64,
    #[serde(default = "default_critical_mb")]
    pub critical_mb: u64,
    #[serde(default = "default_hard_limit_mb")]
    pub hard_limit_mb: u64,
}

fn default_warning_mb() -> u64 {
    100
}

fn default_critical_mb() -> u64 {
    250
}

fn default_hard_limit_mb() -> u64 {
    500
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            warning_mb: default_warning_mb(),
            critical_mb: default_critical_mb(),
            hard_limit_mb: default_hard_limit_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How often the dispatcher drains the pending queue.
    #[serde(default = "default_sync_interval", with = "duration_format")]
    pub interval: Duration,
    /// How often the accumulator is checked for an age-triggered flush.
    #[serde(default = "default_age_check_interval", with = "duration_format")]
    pub age_check_interval: Duration,
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_age_check_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: default_sync_interval(),
            age_check_interval: default_age_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Defaults to `status.json` next to the queue directory.
    pub path: Option<PathBuf>,
    #[serde(default = "default_heartbeat_interval", with = "duration_format")]
    pub heartbeat_interval: Duration,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            path: None,
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub probe: ProbeMode,
    #[serde(default = "default_probe_timeout", with = "duration_format")]
    pub probe_timeout: Duration,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(3)
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe: ProbeMode::default(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// TCP connect to the ingest endpoint before each pass.
    #[default]
    Tcp,
    /// Skip probing and always attempt to send.
    AssumeOnline,
}

// Custom serde module for duration parsing ("500ms", "30s", "5m", "1h")
pub(crate) mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if s.ends_with("ms") {
            (&s[..s.len() - 2], "ms")
        } else if s.ends_with('s') {
            (&s[..s.len() - 1], "s")
        } else if s.ends_with('m') {
            (&s[..s.len() - 1], "m")
        } else if s.ends_with('h') {
            (&s[..s.len() - 1], "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(format!("unknown unit: {}", unit)),
        };

        Ok(duration)
    }

    pub fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if secs % 3600 == 0 && secs > 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 && secs > 0 {
            format!("{}m", secs / 60)
        } else if secs > 0 {
            format!("{}s", secs)
        } else {
            format!("{}ms", d.as_millis())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(
            duration_format::parse_duration("500ms").unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(
            duration_format::parse_duration("30s").unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(
            duration_format::parse_duration("5m").unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(
            duration_format::parse_duration("2h").unwrap(),
            Duration::from_secs(7200)
        );
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(duration_format::parse_duration("").is_err());
        assert!(duration_format::parse_duration("fast").is_err());
        assert!(duration_format::parse_duration("10d").is_err());
    }

    #[test]
    fn test_format_duration_round_trips() {
        for s in ["250ms", "45s", "5m", "1h"] {
            let d = duration_format::parse_duration(s).unwrap();
            assert_eq!(duration_format::format_duration(d), s);
        }
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let yaml = r#"
ingest:
  url: "https://ingest.example.com"
queue:
  path: /tmp/courier-queue
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.device.is_none());
        assert_eq!(config.queue.flush.max_signals, 200);
        assert_eq!(config.queue.retry.max_attempts, 10);
        assert_eq!(config.maintenance.hard_limit_mb, 500);
        assert_eq!(config.sync.interval, Duration::from_secs(300));
        assert_eq!(config.network.probe, ProbeMode::Tcp);
    }
}
