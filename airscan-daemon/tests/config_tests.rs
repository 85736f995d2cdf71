//! Configuration loading tests.
//!
//! Tests file loading, the missing-default-file fallback, environment
//! overrides, and validation as seen by the daemon.

use std::fs;

use airscan_daemon::orchestrator::load_config;
use serial_test::serial;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[general]
log_level = "debug"
log_format = "pretty"
pid_file = ""

[server]
listen_addr = "127.0.0.1"
listen_port = 8091
cross_origin = "*"
hotplug = false
mdns_announce = false
job_max_age_secs = 60

[[devices]]
name = "sim:one"
model = "One"

[[devices]]
name = "sim:two"
model = "Two"
sources = ["ADF"]
feeder_pages = 3
"#;

#[tokio::test]
#[serial]
async fn test_load_full_config_file() {
    // Given
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("airscan.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    // When
    let config = load_config(&path, false).await.expect("config loads");

    // Then
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.server.listen_port, 8091);
    assert_eq!(config.server.cross_origin, "*");
    assert!(!config.server.hotplug);
    assert_eq!(config.server.job_max_age_secs, 60);
    assert_eq!(config.devices.len(), 2);
    assert_eq!(config.devices[1].feeder_pages, 3);
    // unspecified values keep their defaults
    assert_eq!(config.server.purge_interval_secs, 30);
}

#[tokio::test]
#[serial]
async fn test_missing_file_falls_back_to_defaults_when_allowed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let config = load_config(&path, true).await.expect("defaults used");

    assert_eq!(config.server.listen_port, 8090);
    assert!(config.devices.is_empty());
}

#[tokio::test]
#[serial]
async fn test_missing_explicit_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let err = load_config(&path, false).await.unwrap_err();

    assert!(err.to_string().contains("absent.toml"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_env_overrides_apply_to_fallback_defaults() {
    // Given
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    unsafe { std::env::set_var("AIRSCAN_SERVER_LISTEN_PORT", "9999") };

    // When
    let config = load_config(&path, true).await;

    // Then
    unsafe { std::env::remove_var("AIRSCAN_SERVER_LISTEN_PORT") };
    assert_eq!(config.unwrap().server.listen_port, 9999);
}

#[tokio::test]
#[serial]
async fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("airscan.toml");
    fs::write(&path, "[general]\nlog_format = \"xml\"\n").unwrap();

    let err = load_config(&path, false).await.unwrap_err();

    assert!(err.to_string().contains("log_format"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_malformed_toml_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("airscan.toml");
    fs::write(&path, "[server\nlisten_port = ").unwrap();

    assert!(load_config(&path, false).await.is_err());
}
