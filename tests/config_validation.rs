//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::panic)]

use objwire::config::{ChannelConfig, ClientConfig, LoggingConfig, NetworkConfig, ServerConfig};
use objwire::error::ProtocolError;
use std::time::Duration;
use tracing::Level;

fn has_error(config: &NetworkConfig, needle: &str) -> bool {
    config.validate().iter().any(|e| e.contains(needle))
}

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = "invalid_address".to_string();
    assert!(has_error(&config, "Invalid server address"));
}

#[test]
fn test_empty_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();
    assert!(has_error(&config, "cannot be empty"));
}

#[test]
fn test_unix_socket_addresses_accepted() {
    let mut config = NetworkConfig::default();
    config.server.address = "unix:/tmp/objwire.sock".to_string();
    config.client.address = "unix:/tmp/objwire.sock".to_string();
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_client_address() {
    let mut config = NetworkConfig::default();
    config.client.address = "not:a:valid:address".to_string();
    assert!(has_error(&config, "Invalid client address"));
}

#[test]
fn test_zero_max_sessions() {
    let mut config = NetworkConfig::default();
    config.server.max_sessions = 0;
    assert!(has_error(&config, "Max sessions must be greater than 0"));
}

#[test]
fn test_high_max_sessions_warning() {
    let mut config = NetworkConfig::default();
    config.server.max_sessions = 150_000;
    assert!(has_error(&config, "Max sessions very high"));
}

#[test]
fn test_short_grace_period() {
    let mut config = NetworkConfig::default();
    config.server.session_grace_period = Duration::from_millis(10);
    assert!(has_error(&config, "Session grace period too short"));
}

#[test]
fn test_short_handshake_timeout() {
    let mut config = NetworkConfig::default();
    config.server.handshake_timeout = Duration::from_millis(50);
    assert!(has_error(&config, "Handshake timeout too short"));
}

#[test]
fn test_zero_reconnect_attempts_with_auto_reconnect() {
    let mut config = NetworkConfig::default();
    config.client.auto_reconnect = true;
    config.client.max_reconnect_attempts = 0;
    assert!(has_error(
        &config,
        "Max reconnect attempts must be greater than 0"
    ));

    config.client.auto_reconnect = false;
    assert!(config.validate().is_empty());
}

#[test]
fn test_heartbeat_interval_only_checked_when_enabled() {
    let mut config = NetworkConfig::default();
    config.client.heartbeat_interval = Duration::from_millis(1);
    assert!(has_error(&config, "Heartbeat interval too short"));

    config.client.heartbeat_enabled = false;
    assert!(config.validate().is_empty());
}

#[test]
fn test_empty_client_id() {
    let mut config = NetworkConfig::default();
    config.client.client_id = String::new();
    assert!(has_error(&config, "Client id cannot be empty"));
}

#[test]
fn test_channel_limits() {
    let mut config = NetworkConfig::default();
    config.channel.call_timeout = Duration::from_millis(1);
    config.channel.max_frame_size = 100;
    config.channel.ticket_pool_limit = 1_000_000;

    assert!(has_error(&config, "Call timeout too short"));
    assert!(has_error(&config, "Max frame size too small"));
    assert!(has_error(&config, "Ticket pool limit too large"));
}

#[test]
fn test_no_logging_output() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;
    assert!(has_error(&config, "At least one logging output"));
}

#[test]
fn test_log_file_requires_path() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;
    assert!(has_error(&config, "log_file_path must be specified"));
}

#[test]
fn test_multiple_errors_reported_together() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();
    config.client.client_id = String::new();
    config.channel.call_timeout = Duration::from_millis(1);
    assert!(config.validate().len() >= 3);
}

#[test]
fn test_validate_strict() {
    assert!(NetworkConfig::default().validate_strict().is_ok());

    let mut config = NetworkConfig::default();
    config.server.max_sessions = 0;
    match config.validate_strict() {
        Err(ProtocolError::ConfigError(message)) => {
            assert!(message.contains("Max sessions must be greater than 0"))
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = NetworkConfig::from_toml(
        r#"
        [server]
        address = "0.0.0.0:7100"
        session_grace_period = 2500

        [client]
        client_id = "worker-7"
        heartbeat_enabled = false

        [logging]
        log_level = "warn"
        "#,
    )
    .expect("valid toml");

    assert_eq!(config.server.address, "0.0.0.0:7100");
    assert_eq!(config.server.session_grace_period, Duration::from_millis(2500));
    assert_eq!(config.server.max_sessions, ServerConfig::default().max_sessions);
    assert_eq!(config.client.client_id, "worker-7");
    assert!(!config.client.heartbeat_enabled);
    assert_eq!(config.client.max_reconnect_attempts, ClientConfig::default().max_reconnect_attempts);
    assert_eq!(config.channel.call_timeout, ChannelConfig::default().call_timeout);
    assert_eq!(config.logging.log_level, Level::WARN);
    assert_eq!(config.logging.app_name, LoggingConfig::default().app_name);
}

#[test]
fn test_malformed_toml_is_config_error() {
    let result = NetworkConfig::from_toml("[server\naddress = ");
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));

    let result = NetworkConfig::from_toml("[logging]\nlog_level = \"loud\"");
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
}

#[test]
fn test_save_and_reload() {
    let path = std::env::temp_dir().join(format!("objwire-config-{}.toml", rand::random::<u64>()));
    let config = NetworkConfig::default_with_overrides(|c| {
        c.channel.ticket_pool_limit = 4;
        c.client.reconnect_delay = Duration::from_millis(250);
    });
    config.save_to_file(&path).expect("saved");

    let loaded = NetworkConfig::from_file(&path).expect("loaded");
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded.channel.ticket_pool_limit, 4);
    assert_eq!(loaded.client.reconnect_delay, Duration::from_millis(250));
}

#[test]
fn test_missing_file_is_config_error() {
    let result = NetworkConfig::from_file("/nonexistent/objwire.toml");
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
}
