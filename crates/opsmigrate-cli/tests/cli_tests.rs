//! CLI integration tests for opsmigrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for configuration and connection errors.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the opsmigrate binary.
fn cmd() -> Command {
    Command::cargo_bin("opsmigrate").unwrap()
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// A MySQL connection on a port nothing listens on.
const UNREACHABLE_CONFIG: &str = r#"
connections:
  nowhere:
    type: mysql
    host: 127.0.0.1
    port: 1
    user: root
    connect_timeout_secs: 2
"#;

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("test-connection"))
        .stdout(predicate::str::contains("collections"))
        .stdout(predicate::str::contains("units"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("compare"));
}

#[test]
fn test_migrate_subcommand_help() {
    cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--target-collection"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--no-create-schema"))
        .stdout(predicate::str::contains("--truncate-target"))
        .stdout(predicate::str::contains("--schema-only"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("opsmigrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_compare_requires_units() {
    cmd()
        .args([
            "compare",
            "--source",
            "a",
            "--target",
            "b",
            "--collection",
            "shop",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--unit"));
}

// =============================================================================
// Error Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_file_exit_code() {
    cmd()
        .args(["--config", "/nonexistent/opsmigrate.yaml", "collections", "db"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_exit_code() {
    let file = config_file("connections: [unclosed");
    cmd()
        .arg("--config")
        .arg(file.path())
        .args(["collections", "db"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_connection_config_exit_code() {
    let file = config_file(
        r#"
connections:
  broken:
    type: mysql
    host: ""
    user: root
"#,
    );
    cmd()
        .arg("--config")
        .arg(file.path())
        .args(["collections", "broken"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("host"));
}

#[test]
fn test_unknown_connection_name() {
    let file = config_file(UNREACHABLE_CONFIG);
    cmd()
        .arg("--config")
        .arg(file.path())
        .args(["collections", "missing"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn test_unreachable_connection_exit_code() {
    let file = config_file(UNREACHABLE_CONFIG);
    cmd()
        .arg("--config")
        .arg(file.path())
        .args(["--output-json", "test-connection", "nowhere"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"ok\": false"));
}
