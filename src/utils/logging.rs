//! Structured logging set-up.
//!
//! Installs a global `tracing-subscriber` fmt subscriber driven by
//! [`LoggingConfig`]. `RUST_LOG`, when set, takes precedence over the
//! configured level.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::{File, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// File output wins over console output when both are enabled.
///
/// # Errors
/// `ConfigError` when the log file cannot be opened or a subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match (config.log_to_file, config.json_format) {
        (true, json) => {
            let file = open_log_file(config)?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        (false, true) => builder.json().try_init(),
        (false, false) => builder.try_init(),
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::debug!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()))
}

fn open_log_file(config: &LoggingConfig) -> Result<File> {
    let path = config.log_file_path.as_deref().ok_or_else(|| {
        ProtocolError::ConfigError("log_file_path must be specified when log_to_file is true".into())
    })?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_requires_path() {
        let config = LoggingConfig {
            log_to_file: true,
            log_file_path: None,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            open_log_file(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
