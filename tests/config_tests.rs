//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

mod common;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use predicates::prelude::*;
use tempfile::TempDir;

use taskwire::config::{init_config, AppConfig};
use taskwire::Error;

/// Test fixture for configuration testing
struct ConfigFixture {
    temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self { temp_dir, config_path }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("taskwire").unwrap();
        cmd.current_dir(self.temp_dir.path())
            .env_remove("TASKWIRE_URL")
            .env_remove("TASKWIRE_CONFIG");
        cmd
    }
}

// ─────────────────────────────────────────────────────────────────
// Library API
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_valid_fixture_loads() {
    let config = AppConfig::from_file(&common::valid_config_fixture()).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.channel.url, "wss://backend.example.com");
    assert_eq!(config.channel.max_reconnect_attempts, 3);
    assert_eq!(config.logging.max_entries, 200);

    let channel = config.channel.channel_config("wss://backend.example.com/task/1");
    assert_eq!(channel.reconnect.delay_for(1), Duration::from_millis(500));
    assert_eq!(channel.reconnect.delay_for(10), Duration::from_millis(8000));
    assert_eq!(channel.heartbeat_interval, Duration::from_secs(15));
}

#[test]
fn test_invalid_fixture_fails_validation() {
    let config = AppConfig::from_file(&common::invalid_config_fixture()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, Error::ConfigValidation { .. }));
    assert_eq!(err.exit_code(), 10);
    assert!(err.suggestion().is_some());
}

#[test]
fn test_init_writes_loadable_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("taskwire").join("config.toml");

    let written = init_config(path.to_str(), false).unwrap();
    let config = AppConfig::from_file(&written).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.channel.base_delay_ms, 1000);
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[channel]\nurl = \"wss://example.com\"\n");

    fixture
        .cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .success();
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[channel]
url = "wss://backend.example.com/api"
base_delay_ms = 250
max_delay_ms = 4000
max_reconnect_attempts = 8
heartbeat_interval_ms = 10000
connect_timeout_ms = 3000

[logging]
level = "debug"
file = "/tmp/taskwire-test.log"
max_file_size_mb = 50
max_files = 3
json_format = true
max_entries = 500
"#,
    );

    fixture
        .cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_channel_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[channel]\nurl = \"http://not-websocket.com\"\n");

    fixture
        .cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .code(10)
        .stderr(predicates::str::contains("channel.url").or(predicates::str::contains("ws://")));
}

#[test]
fn test_cap_below_base_delay() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[channel]\nbase_delay_ms = 5000\nmax_delay_ms = 1000\n");

    fixture
        .cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure();
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[logging]\nlevel = \"invalid_level\"\n");

    fixture
        .cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure();
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[channel\nurl = \"wss://example.com\"\n");

    fixture
        .cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .code(10)
        .stderr(predicates::str::contains("parse"));
}

// ─────────────────────────────────────────────────────────────────
// Config Show / Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_custom() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[channel]\nurl = \"wss://custom.example.com\"\nmax_reconnect_attempts = 12\n");

    fixture
        .cmd()
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicates::str::contains("wss://custom.example.com"))
        .stdout(predicates::str::contains("max_reconnect_attempts = 12"));
}

#[test]
fn test_config_init_creates_valid_file() {
    let fixture = ConfigFixture::new();
    let path = fixture.temp_dir.path().join("new_config.toml");
    let path = path.to_str().unwrap();

    fixture
        .cmd()
        .args(["config", "init", "--path", path])
        .assert()
        .success()
        .stdout(predicates::str::contains("Configuration file created"));

    fixture
        .cmd()
        .args(["config", "validate", "--config", path])
        .assert()
        .success();
}

#[test]
fn test_config_init_refuses_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[channel]\n");

    fixture
        .cmd()
        .args(["config", "init", "--path", fixture.path()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("already exists"));
}

#[test]
fn test_config_init_force_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[channel]\nurl = \"wss://old.example.com\"\n");

    fixture
        .cmd()
        .args(["config", "init", "--path", fixture.path(), "--force"])
        .assert()
        .success();

    let content = fs::read_to_string(fixture.path()).unwrap();
    assert!(!content.contains("old.example.com"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_file() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[channel]\nurl = \"wss://file.example.com\"\n");

    fixture
        .cmd()
        .args(["config", "show", "--config", fixture.path()])
        .env("TASKWIRE_URL", "wss://env.example.com")
        .env("TASKWIRE_MAX_RECONNECT_ATTEMPTS", "17")
        .assert()
        .success()
        .stdout(predicates::str::contains("wss://env.example.com"))
        .stdout(predicates::str::contains("max_reconnect_attempts = 17"));
}

#[test]
fn test_invalid_env_override_fails_validation() {
    let fixture = ConfigFixture::new();

    fixture
        .cmd()
        .args(["config", "validate"])
        .env("TASKWIRE_URL", "ftp://nope")
        .assert()
        .code(10);
}

#[test]
fn test_log_file_tilde_expansion() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[logging]\nfile = \"~/taskwire/taskwire.log\"\n");

    let output = fixture
        .cmd()
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(!stdout.contains("file = \"~"));
}
