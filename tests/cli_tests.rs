//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Variables the binary reads; cleared so the host environment cannot leak in
const ENV_VARS: &[&str] = &[
    "SLACK_TOKEN",
    "SLACK_COOKIE",
    "WORK_DAYS",
    "WORK_START",
    "WORK_END",
    "GMT_OFFSET",
    "ALWAYS_ACTIVE_CONFIG",
    "ALWAYS_ACTIVE_ENDPOINT",
    "ALWAYS_ACTIVE_GATEWAY_SERVER",
    "ALWAYS_ACTIVE_USE_RECONNECT_HINT",
    "ALWAYS_ACTIVE_AUTH_URL",
    "ALWAYS_ACTIVE_CACHE_PATH",
    "ALWAYS_ACTIVE_LOG_LEVEL",
    "ALWAYS_ACTIVE_LOG_FILE",
    "ALWAYS_ACTIVE_LOG_JSON",
    "RUST_LOG",
];

/// Command running inside an empty directory with no config to find
fn app_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("always-active").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join(".config"));
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("always-active"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("schedule"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("always-active"))
        .stdout(predicate::str::contains("commit"))
        .stdout(predicate::str::contains("target"));
}

#[test]
fn test_short_version_flag() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("always-active"));
}

#[test]
fn test_unknown_command() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .arg("sleep")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// ─────────────────────────────────────────────────────────────────
// Schedule Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_schedule_active_on_weekday() {
    let dir = TempDir::new().unwrap();
    // 2025-03-24 is a Monday
    app_cmd(&dir)
        .args(["schedule", "--at", "2025-03-24T10:30:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status:      active"))
        .stdout(predicate::str::contains("Goes offline:"))
        .stdout(predicate::str::contains("2025-03-24 17:00:00 (GMT+0)"));
}

#[test]
fn test_schedule_inactive_on_weekend() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .args(["schedule", "--at", "2025-03-29T12:00:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("inactive"))
        .stdout(predicate::str::contains("2025-03-31 09:00:00 (GMT+0)"));
}

#[test]
fn test_schedule_respects_env_window() {
    let dir = TempDir::new().unwrap();
    // 06:30 UTC is 09:30 at GMT+3
    app_cmd(&dir)
        .env("WORK_DAYS", "saturday")
        .env("WORK_START", "09:00")
        .env("WORK_END", "10:00")
        .env("GMT_OFFSET", "3")
        .args(["schedule", "--at", "2025-03-29T06:30:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sat 09:00-10:00 GMT+3"))
        .stdout(predicate::str::contains("Status:      active"))
        .stdout(predicate::str::contains("2025-03-29 10:00:00 (GMT+3)"));
}

#[test]
fn test_schedule_window_end_is_exclusive() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .args(["schedule", "--at", "2025-03-24T17:00:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("inactive"))
        .stdout(predicate::str::contains("2025-03-25 09:00:00 (GMT+0)"));
}

#[test]
fn test_schedule_bad_instant() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .args(["schedule", "--at", "monday morning"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --at value"));
}

#[test]
fn test_schedule_bad_work_day() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .env("WORK_DAYS", "monday,funday")
        .args(["schedule", "--at", "2025-03-24T10:30:00Z"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("funday"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[credentials]"))
        .stdout(predicate::str::contains("[schedule]"))
        .stdout(predicate::str::contains("[connection]"))
        .stdout(predicate::str::contains("[cache]"))
        .stdout(predicate::str::contains("[logging]"));
}

#[test]
fn test_config_show_masks_credentials() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .env("SLACK_TOKEN", "xoxc-1234567890-secret")
        .env("SLACK_COOKIE", "d=xoxd-abcdefghijkl")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("xoxc-…"))
        .stdout(predicate::str::contains("1234567890").not())
        .stdout(predicate::str::contains("abcdefghijkl").not());
}

#[test]
fn test_config_validate_default() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Mon,Tue,Wed,Thu,Fri 09:00-17:00 GMT+0"))
        .stdout(predicate::str::contains("SLACK_TOKEN"));
}

#[test]
fn test_config_validate_bad_offset() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .env("GMT_OFFSET", "three")
        .args(["config", "validate"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("invalid GMT offset"));
}

#[test]
fn test_config_validate_missing_file() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .args(["config", "validate", "--config", "/nonexistent/always-active.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config init"));
}

#[test]
fn test_config_init() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("always-active.toml");

    app_cmd(&dir)
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file created"));

    assert!(path.exists());

    // The generated file is picked up from the working directory and valid
    app_cmd(&dir)
        .args(["config", "validate"])
        .assert()
        .success();

    // Refuses to overwrite without --force
    app_cmd(&dir)
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    app_cmd(&dir)
        .args(["config", "init", "--force", "--path"])
        .arg(&path)
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Run and Check Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_requires_credentials() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .env("ALWAYS_ACTIVE_LOG_FILE", "")
        .arg("run")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("SLACK_TOKEN"));
}

#[test]
fn test_check_reads_dotenv_credentials() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(".env"),
        "SLACK_TOKEN=xoxc-from-dotenv\nSLACK_COOKIE=d=xoxd-from-dotenv\n",
    )
    .unwrap();

    // Gets past the credential check and stops at the missing auth url
    app_cmd(&dir)
        .arg("check")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("auth.url"))
        .stderr(predicate::str::contains("SLACK_TOKEN").not());
}

#[test]
fn test_check_requires_auth_url() {
    let dir = TempDir::new().unwrap();
    app_cmd(&dir)
        .env("SLACK_TOKEN", "xoxc-test")
        .env("SLACK_COOKIE", "d=xoxd-test")
        .arg("check")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("auth.url"));
}
