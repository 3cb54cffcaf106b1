use crate::config::parse::load_config;
use crate::status::read_status;
use std::path::PathBuf;

/// Prints the status file of a (possibly running) agent.
pub fn show(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path.ok_or(
        "config not found; use --config <path> or run 'courier config init' first",
    )?;
    let config = load_config(&config_path)?;

    let status_path = config
        .status
        .path
        .ok_or("status path missing from resolved config")?;

    let snapshot = match read_status(&status_path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return Err(format!(
                "No readable status file at {} ({}). Has the agent run yet?",
                status_path.display(),
                e
            )
            .into());
        }
    };

    println!("agent_running:           {}", snapshot.agent_running);
    println!("last_heartbeat:          {}", snapshot.last_heartbeat);
    println!("current_signals:         {}", snapshot.current_signals);
    println!("pending_files:           {}", snapshot.pending_files);
    println!("pending_signals:         {}", snapshot.pending_signals);
    println!("failed_files:            {}", snapshot.failed_files);
    println!("total_size_mb:           {:.2}", snapshot.total_size_mb);
    println!(
        "oldest_pending:          {}",
        snapshot
            .oldest_pending
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "last_successful_upload:  {}",
        snapshot
            .last_successful_upload
            .map(|t| t.to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "last_error:              {}",
        snapshot.last_error.as_deref().unwrap_or("-")
    );
    println!(
        "upload_success_rate_24h: {}",
        snapshot
            .upload_success_rate_24h
            .map(|r| format!("{:.0}%", r * 100.0))
            .unwrap_or_else(|| "-".to_string())
    );

    Ok(())
}
