//! Layered configuration: defaults, TOML file, environment.

use mcu_panel::config::{ConfigError, PanelConfig};
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mcu-panel.toml");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = PanelConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, PanelConfig::default());
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    let (_dir, path) = write_config(
        r#"
[serial]
port = "/dev/ttyACM0"
baud_rate = 115200
read_timeout_ms = 40

[timeouts]
command_ms = 20000
"#,
    );

    let config = PanelConfig::load_from(&path).unwrap();
    assert_eq!(config.serial.port, "/dev/ttyACM0");
    assert_eq!(config.serial.baud_rate, 115_200);
    assert_eq!(config.read_timeout(), Duration::from_millis(40));
    assert_eq!(config.command_timeout(), Duration::from_secs(20));
    // Unset keys keep their defaults.
    assert_eq!(config.startup_timeout(), Duration::from_secs(5));
    assert_eq!(config.logging.level, "info");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let (_dir, path) = write_config(
        r#"
[serial]
port = "COM3"
"#,
    );

    std::env::set_var("MCU_PANEL_SERIAL__PORT", "COM7");
    std::env::set_var("MCU_PANEL_LOGGING__LEVEL", "debug");
    let result = PanelConfig::load_from(&path);
    std::env::remove_var("MCU_PANEL_SERIAL__PORT");
    std::env::remove_var("MCU_PANEL_LOGGING__LEVEL");

    let config = result.unwrap();
    assert_eq!(config.serial.port, "COM7");
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_invalid_values_rejected() {
    let (_dir, path) = write_config(
        r#"
[timeouts]
poll_interval_ms = 5000
"#,
    );

    match PanelConfig::load_from(&path) {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("poll_interval_ms")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_malformed_toml_is_load_error() {
    let (_dir, path) = write_config("[serial\nport = ");
    assert!(matches!(
        PanelConfig::load_from(&path),
        Err(ConfigError::LoadError(_))
    ));
}
