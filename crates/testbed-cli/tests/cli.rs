// crates/testbed-cli/tests/cli.rs
// ============================================================================
// Module: CLI End-to-End Tests
// Description: Integration tests for the `testbed` binary.
// Purpose: Validate listing, running, reports, and exit codes.
// Dependencies: testbed-cli binary, tempfile, serde_json
// ============================================================================
//! ## Overview
//! Builds a small convention tree with a `sh` test command and drives the
//! binary against it.

#![cfg(unix)]
#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use serde_json::Value;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const ENGINE: &str = r#"if grep -q FAIL "$0"; then echo boom >&2; exit 1; fi; if grep -q SKIP "$0"; then exit 77; fi; exit 0"#;

fn testbed_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_testbed"))
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn workspace(extra_config: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "tests/basic/pass.sql", "select 1;\n");
    write(dir.path(), "tests/basic/fail.sql", "-- groups: slow\nFAIL\n");
    write(dir.path(), "tests/skip.sql", "SKIP\n");
    let config = format!(
        "[discovery]\nroot = \"tests\"\n\n[executor]\ncommand = [\"sh\", \"-c\", '{ENGINE}']\n\n{extra_config}"
    );
    write(dir.path(), "testbed.toml", &config);
    dir
}

fn testbed(dir: &TempDir, args: &[&str]) -> Output {
    Command::new(testbed_bin())
        .args(args)
        .current_dir(dir.path())
        .env_remove("TESTBED_CONFIG")
        .env_remove("TESTBED_THREADS")
        .env_remove("TESTBED_REPORT_DIR")
        .env_remove("TESTBED_PRESERVE_ON_FAILURE")
        .env_remove("TESTBED_LOG")
        .output()
        .expect("run testbed")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn list_prints_names_in_discovery_order() {
    let dir = workspace("");

    let output = testbed(&dir, &["list"]);

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output), "tests.basic.fail\ntests.basic.pass\ntests.skip\n");
}

#[test]
fn list_json_honours_group_selection() {
    let dir = workspace("");

    let output = testbed(&dir, &["list", "--format", "json", "--group", "slow"]);

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let value: Value = serde_json::from_str(&stdout(&output)).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "tests.basic.fail");
    assert_eq!(entries[0]["groups"], serde_json::json!(["slow"]));
}

#[test]
fn run_reports_failures_and_writes_summary() {
    let dir = workspace("[run]\nthreads = 2\nreport_dir = \"reports\"\n");

    let output = testbed(&dir, &["run"]);

    assert_eq!(output.status.code(), Some(1), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("failed tests.basic.fail: exit code 1: boom"), "{out}");
    assert!(out.contains("passed tests.basic.pass"), "{out}");
    assert!(out.contains("skipped tests.skip"), "{out}");
    assert!(out.contains("passed: 1, failed: 1, skipped: 1"), "{out}");
    let summary: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("reports/summary.json")).unwrap())
            .unwrap();
    assert_eq!(summary["failed"], 1);
    assert!(dir.path().join("reports/summary.md").is_file());
}

#[test]
fn run_with_excluded_failures_succeeds() {
    let dir = workspace("");

    let output = testbed(&dir, &["run", "--exclude-group", "slow"]);

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(stdout(&output).contains("passed: 1, failed: 0, skipped: 1"));
}

#[test]
fn discovery_errors_exit_two_but_still_list() {
    let dir = workspace("");
    write(dir.path(), "tests/notes.txt", "not a test\n");

    let output = testbed(&dir, &["list"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("discovery error"), "{}", stderr(&output));
    assert_eq!(stdout(&output), "tests.basic.fail\ntests.basic.pass\ntests.skip\n");
}

#[test]
fn run_requires_an_executor_command() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "tests/one.sql", "select 1;\n");

    let output = testbed(&dir, &["run"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("executor.command"), "{}", stderr(&output));
}

#[test]
fn config_validate_reports_invalid_values() {
    let dir = workspace("[run]\nthreads = 0\n");

    let output = testbed(&dir, &["config", "validate"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("run.threads"), "{}", stderr(&output));
}

#[test]
fn config_validate_accepts_explicit_path() {
    let dir = workspace("");
    let path = dir.path().join("testbed.toml");

    let output = testbed(&dir, &["--config", path.to_str().unwrap(), "config", "validate"]);

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(stdout(&output).starts_with("config ok: "));
}
