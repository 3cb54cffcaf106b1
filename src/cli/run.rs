use crate::agent::{AgentRunner, TelemetryProducer};
use crate::config::parse::load_config;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("agent error: {0}")]
    Agent(#[from] crate::agent::AgentError),
}

/// One NDJSON line on stdin.
#[derive(Debug, Deserialize)]
struct StdinRecord {
    stream: String,
    payload: serde_json::Value,
}

pub async fn run(
    config_path: Option<PathBuf>,
    stdin_records: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/courier/config.yml");
            eprintln!("  /etc/courier/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'courier config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_agent(&config_path, stdin_records)
        .await
        .map_err(|e| e.into())
}

async fn run_agent(config_path: &PathBuf, stdin_records: bool) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let cancel = CancellationToken::new();
    let handle = AgentRunner::new(config).start(cancel.clone()).await?;

    if stdin_records {
        info!("Bridging NDJSON records from stdin");
        let producer = handle.producer.clone();
        let stdin_cancel = cancel.clone();
        tokio::spawn(async move {
            run_stdin_bridge(producer, stdin_cancel).await;
        });
    }

    info!("Agent running, press Ctrl+C to shutdown");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    handle.join().await;
    info!("Agent shutdown complete");

    Ok(())
}

/// Feeds stdin lines of `{"stream": ..., "payload": ...}` into the producer.
/// EOF just stops the bridge; the agent keeps running.
async fn run_stdin_bridge(producer: TelemetryProducer, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Stdin closed, record bridge stopping");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Stdin read error, record bridge stopping");
                    break;
                }
            },
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<StdinRecord>(line) {
            Ok(record) => producer.add_record(record.stream, record.payload),
            Err(e) => warn!(error = %e, "Skipping malformed stdin record"),
        }
    }
}
