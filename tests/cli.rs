//! Integration tests for the sandlot CLI.
//!
//! These tests verify the CLI binary behavior by running the actual
//! executable and checking output, exit codes, and file system effects.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the sandlot binary.
#[allow(deprecated)]
fn sandlot() -> Command {
    Command::cargo_bin("sandlot").expect("failed to find sandlot binary")
}

/// Creates a Command for sandlot running in a specific directory.
fn sandlot_in(dir: &TempDir) -> Command {
    let mut cmd = sandlot();
    cmd.current_dir(dir.path());
    cmd
}

/// Writes a `sandlot.toml` pointing the workspace root inside `dir`, so
/// tests never touch the real cache directory.
fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let root = dir.path().join("workspaces");
    fs::write(
        dir.path().join("sandlot.toml"),
        format!("[sessions]\nworkspace_root = \"{}\"\n", root.display()),
    )
    .unwrap();
    root
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    sandlot()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandlot"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("engines"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn test_version_shows_version() {
    sandlot()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandlot"));
}

#[test]
fn test_run_help_shows_all_options() {
    sandlot()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--name"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--timeout"))
        .stdout(predicate::str::contains("--keep"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_clean_help_shows_all_options() {
    sandlot()
        .args(["clean", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--workspace-root"))
        .stdout(predicate::str::contains("--older-than"));
}

// -----------------------------------------------------------------------------
// Scan command tests
// -----------------------------------------------------------------------------

#[test]
fn test_scan_clean_file_passes() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("hello.py"), "print('hello')\n").unwrap();

    sandlot_in(&dir)
        .args(["scan", "hello.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Security Scan"))
        .stdout(predicate::str::contains("clear"));
}

#[test]
fn test_scan_dangerous_file_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("evil.py"),
        "import os\nos.system('rm -rf /')\n",
    )
    .unwrap();

    sandlot_in(&dir)
        .args(["scan", "evil.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("blocked"));
}

#[test]
fn test_scan_json_prints_assessment() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("hello.py"), "print('hello')\n").unwrap();

    sandlot_in(&dir)
        .args(["scan", "hello.py", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"score\""))
        .stdout(predicate::str::contains("\"findings\""));
}

#[test]
fn test_scan_missing_file_fails() {
    let dir = TempDir::new().unwrap();

    sandlot_in(&dir)
        .args(["scan", "missing.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.py"));
}

#[test]
fn test_scan_accepts_a_directory() {
    let dir = TempDir::new().unwrap();
    let bundle = dir.path().join("tool");
    fs::create_dir_all(&bundle).unwrap();
    fs::write(bundle.join("main.py"), "print('hello')\n").unwrap();
    fs::write(bundle.join("helper.py"), "x = 1\n").unwrap();

    sandlot_in(&dir)
        .args(["scan", "tool"])
        .assert()
        .success()
        .stdout(predicate::str::contains("clear"));
}

// -----------------------------------------------------------------------------
// Engines command tests
// -----------------------------------------------------------------------------

#[test]
fn test_engines_lists_the_registry() {
    let dir = TempDir::new().unwrap();

    sandlot_in(&dir)
        .arg("engines")
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered engines"))
        .stdout(predicate::str::contains("node-web"))
        .stdout(predicate::str::contains("python"))
        .stdout(predicate::str::contains("static"));
}

// -----------------------------------------------------------------------------
// Clean command tests
// -----------------------------------------------------------------------------

#[test]
fn test_clean_reports_empty_root() {
    let dir = TempDir::new().unwrap();
    write_config(&dir);

    sandlot_in(&dir)
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("No stale workspaces"));
}

#[test]
fn test_clean_keeps_fresh_workspaces() {
    let dir = TempDir::new().unwrap();
    let root = write_config(&dir);
    fs::create_dir_all(root.join("session-a")).unwrap();

    sandlot_in(&dir)
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("No stale workspaces"));

    assert!(root.join("session-a").exists());
}

#[test]
fn test_clean_older_than_zero_removes_everything() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("ws");
    fs::create_dir_all(root.join("session-a")).unwrap();
    fs::create_dir_all(root.join("session-b")).unwrap();

    sandlot()
        .args([
            "clean",
            "--workspace-root",
            root.to_str().unwrap(),
            "--older-than",
            "0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 workspaces"));

    assert!(!root.join("session-a").exists());
    assert!(!root.join("session-b").exists());
}

// -----------------------------------------------------------------------------
// Run command tests (failure paths; execution is covered in lifecycle tests)
// -----------------------------------------------------------------------------

#[test]
fn test_run_requires_files() {
    sandlot()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_run_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir);

    sandlot_in(&dir)
        .args(["run", "missing.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_run_unrecognized_files_report_no_engine() {
    let dir = TempDir::new().unwrap();
    write_config(&dir);
    fs::write(dir.path().join("notes.txt"), "plain text\n").unwrap();

    sandlot_in(&dir)
        .args(["run", "notes.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No runtime engine"));
}

#[test]
fn test_run_blocked_submission_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir);
    fs::write(
        dir.path().join("evil.py"),
        "import os\nos.system('rm -rf /')\n",
    )
    .unwrap();

    sandlot_in(&dir)
        .args(["run", "evil.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("blocked"));
}

// -----------------------------------------------------------------------------
// Error message tests
// -----------------------------------------------------------------------------

#[test]
fn test_unknown_command_suggests_help() {
    sandlot()
        .arg("unknown")
        .assert()
        .failure()
        .stderr(predicate::str::contains("help"));
}

// -----------------------------------------------------------------------------
// Verbose flag tests
// -----------------------------------------------------------------------------

#[test]
fn test_verbose_flag_global() {
    let dir = TempDir::new().unwrap();

    sandlot_in(&dir).args(["-v", "engines"]).assert().success();
}
