//! CLI end-to-end tests
//!
//! Tests for the mediashelf command-line interface.

use assert_cmd::prelude::*;
use mediashelf_db::models::ConversionJob;
use mediashelf_db::pool::{get_conn, init_pool};
use mediashelf_db::queries::conversion_jobs;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the mediashelf binary
#[allow(deprecated)]
fn mediashelf_cmd() -> Command {
    Command::cargo_bin("mediashelf").unwrap()
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("mediashelf.toml");
    let content = format!("data_dir = \"{}\"\n{}", dir.join("data").display(), extra);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = mediashelf_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = mediashelf_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mediashelf"))
        .stdout(predicate::str::contains("convert"));
}

#[test]
fn test_cli_start_help() {
    let mut cmd = mediashelf_cmd();
    cmd.args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Start the server"));
}

#[test]
fn test_cli_convert_requires_files() {
    let mut cmd = mediashelf_cmd();
    cmd.arg("convert")
        .assert()
        .failure()
        .stderr(predicate::str::contains("FILES"));
}

#[test]
fn test_cli_check_tools_command() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "");

    let mut cmd = mediashelf_cmd();
    cmd.args(["--config", config.to_str().unwrap(), "check-tools"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ffmpeg"))
        .stdout(predicate::str::contains("ffprobe"));
}

#[test]
fn test_cli_validate_config() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "[server]\nport = 9100\n\n[conversion]\nthrottle_window_secs = 5\n",
    );

    let mut cmd = mediashelf_cmd();
    cmd.args(["validate", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("127.0.0.1:9100"))
        .stdout(predicate::str::contains("Throttle window: 5s"));
}

#[test]
fn test_cli_validate_rejects_unknown_hw_accel() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "[conversion]\nhw_accel = \"quantum\"\n");

    let mut cmd = mediashelf_cmd();
    cmd.args(["validate", config.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown hw_accel"));
}

#[test]
fn test_cli_queue_without_database() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "");

    let mut cmd = mediashelf_cmd();
    cmd.args(["--config", config.to_str().unwrap(), "queue"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queue is empty"));
}

#[test]
fn test_cli_queue_lists_persisted_jobs() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "");

    let data = dir.path().join("data");
    fs::create_dir_all(&data).unwrap();
    let pool = init_pool(data.join("mediashelf.db").to_str().unwrap()).unwrap();
    let job = ConversionJob::new("/media/show/episode.mkv");
    conversion_jobs::upsert_job(&get_conn(&pool).unwrap(), &job).unwrap();
    drop(pool);

    let mut cmd = mediashelf_cmd();
    cmd.args(["--config", config.to_str().unwrap(), "queue"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[queued] /media/show/episode.mkv"))
        .stdout(predicate::str::contains("/media/show/episode.mp4"));
}
