use super::types::Config;
use crate::config::{expand_env_vars, expand_tilde};
use regex::Regex;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(&yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        ))
    })?;

    expand_paths(&mut config);
    resolve_status_path(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap.get(1).unwrap().as_str().to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let var_list = unexpanded_vars.join(", ");
    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=<value>\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            var_list
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    config.queue.path = expand_tilde(&config.queue.path);

    if let Some(status_path) = &config.status.path {
        config.status.path = Some(expand_tilde(status_path));
    }
}

/// Defaults the status file to `status.json` next to the queue directory.
fn resolve_status_path(config: &mut Config) {
    if config.status.path.is_none() {
        let parent = config
            .queue
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| config.queue.path.clone());
        config.status.path = Some(parent.join("status.json"));
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.ingest.url.is_empty() {
        errors.push("ingest.url must not be empty".to_string());
    } else if !config.ingest.url.starts_with("http://") && !config.ingest.url.starts_with("https://")
    {
        errors.push(format!(
            "ingest.url must start with http:// or https://: '{}'",
            config.ingest.url
        ));
    }

    if let Some(device) = &config.device {
        if device.device_id.is_empty() {
            errors.push("device.device_id must not be empty".to_string());
        }
        if device.token.is_empty() {
            errors.push("device.token must not be empty".to_string());
        }
    }

    if config.queue.path.as_os_str().is_empty() {
        errors.push("queue.path must not be empty".to_string());
    }

    if config.queue.flush.max_signals == 0 {
        errors.push("queue.flush.max_signals must be at least 1".to_string());
    }

    if config.queue.retry.max_attempts == 0 {
        errors.push("queue.retry.max_attempts must be at least 1".to_string());
    }

    if config.queue.retry.base_delay.is_zero() {
        errors.push("queue.retry.base_delay must be greater than zero".to_string());
    }

    if config.queue.retry.max_delay < config.queue.retry.base_delay {
        errors.push("queue.retry.max_delay must be >= queue.retry.base_delay".to_string());
    }

    let m = &config.maintenance;
    if !(m.warning_mb <= m.critical_mb && m.critical_mb <= m.hard_limit_mb) {
        errors.push(format!(
            "maintenance thresholds must be ordered warning <= critical <= hard_limit (got {}/{}/{})",
            m.warning_mb, m.critical_mb, m.hard_limit_mb
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
