//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use launch_server::config::{LaunchServerConfig, CONFIG_FILE_NAME};
use launch_server::state::DigestAlgorithm;
use launch_server::ServerError;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = LaunchServerConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_empty_address_rejected() {
    let config = LaunchServerConfig::default_with_overrides(|c| c.server.address = " ".into());
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("address can't be empty")));
}

#[test]
fn test_zero_rate_limit_rejected() {
    let config = LaunchServerConfig::default_with_overrides(|c| {
        c.auth.rate_limit = 0;
        c.auth.rate_limit_window = Duration::ZERO;
    });
    let errors = config.validate();
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert!(matches!(
        config.validate_strict(),
        Err(ServerError::ConfigError(_))
    ));
}

#[test]
fn test_same_key_file_for_both_halves_rejected() {
    let config = LaunchServerConfig::default_with_overrides(|c| {
        c.state.private_key_file = c.state.public_key_file.clone();
    });
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("key files must differ")));
}

#[test]
fn test_no_log_output_rejected() {
    let config = LaunchServerConfig::default_with_overrides(|c| {
        c.logging.log_to_console = false;
        c.logging.log_to_file = false;
    });
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_partial_toml_fills_defaults() {
    let config = LaunchServerConfig::from_toml(
        r#"
        [server]
        address = "launch.example.net"
        port = 7000
        max_connections = 50
        shutdown_timeout = 3000

        [auth]
        rate_limit = 5
        rate_limit_window = 60000
        reject_message = "Slow down"
        allowlist_reject_message = "Not invited"
        allowlist = ["Notch"]
        session_idle_timeout = 120000
        sweep_interval = 5000

        [state]
        updates_dir = "srv/updates"
        profiles_dir = "srv/profiles"
        public_key_file = "keys/public.key"
        private_key_file = "keys/private.key"
        digest_algorithm = "sha512"

        [logging]
        app_name = "launch"
        log_level = "debug"
        log_to_console = true
        log_to_file = false
        json_format = true
        "#,
    )
    .unwrap();

    assert_eq!(config.server.bind_target(), "launch.example.net:7000");
    assert_eq!(config.auth.rate_limit_window, Duration::from_secs(60));
    assert_eq!(config.auth.allowlist.as_deref(), Some(&["Notch".to_string()][..]));
    assert_eq!(config.state.digest_algorithm, DigestAlgorithm::Sha512);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert_eq!(config.launcher.output, Path::new("Launcher.bin"));
    assert!(config.validate().is_empty());
}

#[test]
fn test_malformed_toml_is_config_error() {
    let result = LaunchServerConfig::from_toml("[server]\nport = \"not a number\"");
    assert!(matches!(result, Err(ServerError::ConfigError(_))));
}

#[test]
fn test_resolve_keeps_absolute_paths() {
    let config = LaunchServerConfig::default_with_overrides(|c| {
        c.state.updates_dir = "/var/lib/updates".into();
    })
    .resolve(Path::new("/srv/launch"));

    assert_eq!(config.state.updates_dir, Path::new("/var/lib/updates"));
    assert_eq!(config.state.profiles_dir, Path::new("/srv/launch/profiles"));
    assert_eq!(config.launcher.runtime_dir, Path::new("/srv/launch/runtime"));
}

#[test]
fn test_load_or_create_writes_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join(CONFIG_FILE_NAME);

    let created = LaunchServerConfig::load_or_create(&path).unwrap();
    assert!(path.is_file());
    assert_eq!(created.server.port, 7240);

    std::fs::write(
        &path,
        std::fs::read_to_string(&path)
            .unwrap()
            .replace("port = 7240", "port = 7241"),
    )
    .unwrap();
    assert_eq!(LaunchServerConfig::load_or_create(&path).unwrap().server.port, 7241);
}

#[test]
fn test_example_config_parses_back() {
    let example = LaunchServerConfig::example_config();
    let parsed = LaunchServerConfig::from_toml(&example).unwrap();
    assert_eq!(parsed.server.port, LaunchServerConfig::default().server.port);
}
