use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

// Nothing listens on the discard port, so every request fails fast.
const UNREACHABLE: &str = "http://127.0.0.1:9";

fn crmsync_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("crmsync"));
    cmd.env_remove("PIPEDRIVE_API_TOKEN").env_remove("RUST_LOG");
    cmd
}

fn write_export(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("export.csv");
    fs::write(
        &path,
        "Organization ID,Organization Name,Email,Full Name\n44,Football West,jane@x.com,Jane\n",
    )
    .expect("write export");
    path
}

#[test]
fn help_lists_subcommands() {
    crmsync_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("sync"))
        .stdout(contains("plan"))
        .stdout(contains("check"));
}

#[test]
fn missing_token_is_reported_before_any_request() {
    let dir = TempDir::new().expect("tmp");
    let export = write_export(dir.path());
    crmsync_cmd()
        .args(["sync", "--base-url", UNREACHABLE, "--source"])
        .arg(&export)
        .assert()
        .failure()
        .stderr(contains("no API token configured"));
}

#[test]
fn missing_source_is_a_configuration_error() {
    crmsync_cmd()
        .env("PIPEDRIVE_API_TOKEN", "test-token")
        .args(["sync", "--base-url", UNREACHABLE])
        .assert()
        .failure()
        .stderr(contains("no source export configured"));
}

#[test]
fn unknown_config_key_is_rejected() {
    let dir = TempDir::new().expect("tmp");
    let config = dir.path().join("crmsync.yaml");
    fs::write(&config, "api_token: t\ndry_rn: true\n").expect("write config");
    crmsync_cmd()
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
}

#[test]
fn check_fails_when_crm_is_unreachable() {
    crmsync_cmd()
        .env("PIPEDRIVE_API_TOKEN", "test-token")
        .args(["check", "--base-url", UNREACHABLE, "--max-retries", "0"])
        .assert()
        .failure()
        .stderr(contains("could not reach"));
}

#[test]
fn unreachable_crm_aborts_sync_without_audit_logs() {
    let dir = TempDir::new().expect("tmp");
    let export = write_export(dir.path());
    let out = dir.path().join("logs");
    crmsync_cmd()
        .env("PIPEDRIVE_API_TOKEN", "test-token")
        .args(["sync", "--dry-run", "--base-url", UNREACHABLE, "--max-retries", "0"])
        .arg("--source")
        .arg(&export)
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .failure()
        .stderr(contains("sync aborted"));
    assert!(!out.exists(), "no audit logs may be written for an aborted run");
}

#[test]
fn token_from_config_file_is_used() {
    let dir = TempDir::new().expect("tmp");
    let config = dir.path().join("crmsync.yaml");
    fs::write(
        &config,
        format!("api_token: from-file\nbase_url: {UNREACHABLE}\nmax_retries: 0\n"),
    )
    .expect("write config");
    // Past configuration, so the failure is the connection, not the token.
    crmsync_cmd()
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("could not reach"));
}
