//! CLI integration tests for mssql-pg-copy.
//!
//! These tests cover argument parsing, help output and exit codes for
//! failures that happen before any database is contacted.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the mssql-pg-copy binary.
fn cmd() -> Command {
    Command::cargo_bin("mssql-pg-copy").unwrap()
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--source-schema"))
        .stdout(predicate::str::contains("--target-schema"))
        .stdout(predicate::str::contains("--batch-size"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mssql-pg-copy"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_with_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

#[test]
fn test_health_check_command_exists() {
    cmd()
        .args(["health-check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Test database connections"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // A missing file is an IO error, not a config error
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let file = config_file("invalid: yaml: content: [\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = config_file("");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1);
}

#[test]
fn test_same_source_and_target_exits_with_code_1() {
    let file = config_file(
        r#"
source:
  host: db.local
  port: 5000
  database: shop
  user: sa
  password: x
target:
  host: db.local
  port: 5000
  database: shop
  user: postgres
  password: x
"#,
    );

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot be the same database"));
}

#[test]
fn test_zero_batch_size_override_exits_with_code_1() {
    let file = config_file(
        r#"
source:
  host: mssql.local
  database: Shop
  user: sa
  password: x
target:
  host: pg.local
  database: shop
  user: postgres
  password: x
"#,
    );

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "run",
            "--batch-size",
            "0",
        ])
        .assert()
        .code(1);
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
