// crates/testbed-runner/src/report.rs
// ============================================================================
// Module: Run Reports
// Description: Per-test outcomes and the aggregate run summary.
// Purpose: Write deterministic `summary.json` and readable `summary.md`.
// Dependencies: serde, serde_jcs, thiserror
// ============================================================================

//! ## Overview
//! A [`RunReport`] lists every selected test in discovery order together with
//! status counts and timing. Reports are written as canonical JSON (JCS) so
//! identical runs produce identical bytes apart from timestamps.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;
use testbed_core::CleanupFailure;
use testbed_core::TestStatus;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Report writing errors.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Filesystem failure.
    #[error("report io error at {}: {message}", path.display())]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Error message.
        message: String,
    },
    /// Serialization failure.
    #[error("report serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// SECTION: Report Types
// ============================================================================

/// Outcome of one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    /// Fully qualified test name.
    pub name: String,
    /// Terminal status.
    pub status: TestStatus,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u128,
    /// Failure cause or skip reason.
    pub message: Option<String>,
    /// Cleanup failures suppressed for this test.
    pub cleanup_failures: Vec<CleanupFailure>,
}

impl TestOutcome {
    /// Builds a failed outcome for a test that never ran.
    #[must_use]
    pub fn not_run(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Failed,
            duration_ms: 0,
            message: Some(message.into()),
            cleanup_failures: Vec::new(),
        }
    }
}

/// Aggregate result of a suite run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Run start (milliseconds since epoch).
    pub started_at_ms: u128,
    /// Run end (milliseconds since epoch).
    pub ended_at_ms: u128,
    /// Run duration in milliseconds.
    pub duration_ms: u128,
    /// Passed test count.
    pub passed: usize,
    /// Failed test count.
    pub failed: usize,
    /// Skipped test count.
    pub skipped: usize,
    /// Suite-level cleanup failures.
    pub suite_cleanup_failures: Vec<CleanupFailure>,
    /// Per-test outcomes in discovery order.
    pub tests: Vec<TestOutcome>,
}

impl RunReport {
    /// Builds a report from ordered outcomes.
    #[must_use]
    pub fn new(
        started_at_ms: u128,
        ended_at_ms: u128,
        tests: Vec<TestOutcome>,
        suite_cleanup_failures: Vec<CleanupFailure>,
    ) -> Self {
        let count = |status: TestStatus| tests.iter().filter(|test| test.status == status).count();
        Self {
            started_at_ms,
            ended_at_ms,
            duration_ms: ended_at_ms.saturating_sub(started_at_ms),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            skipped: count(TestStatus::Skipped),
            suite_cleanup_failures,
            tests,
        }
    }

    /// Returns true when any test failed.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Returns the outcome of the named test.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.tests.iter().find(|test| test.name == name)
    }

    /// Writes `summary.json` and `summary.md` into `dir`, creating it.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] when serialization or writing fails.
    pub fn write(&self, dir: &Path) -> Result<(PathBuf, PathBuf), ReportError> {
        fs::create_dir_all(dir).map_err(|err| ReportError::Io {
            path: dir.to_path_buf(),
            message: err.to_string(),
        })?;
        let json_path = dir.join("summary.json");
        let bytes =
            serde_jcs::to_vec(self).map_err(|err| ReportError::Serialization(err.to_string()))?;
        write_file(&json_path, &bytes)?;
        let markdown_path = dir.join("summary.md");
        write_file(&markdown_path, self.to_markdown().as_bytes())?;
        Ok((json_path, markdown_path))
    }

    /// Renders the report as Markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Testbed Run Summary\n\n");
        out.push_str("## Totals\n\n");
        let _ = writeln!(out, "- Passed: {}", self.passed);
        let _ = writeln!(out, "- Failed: {}", self.failed);
        let _ = writeln!(out, "- Skipped: {}", self.skipped);
        let _ = writeln!(out, "- Duration (ms): {}", self.duration_ms);
        out.push_str("\n## Tests\n\n");
        if self.tests.is_empty() {
            out.push_str("- None\n");
        }
        for test in &self.tests {
            let _ = write!(out, "- `{}`: {} ({} ms)", test.name, test.status, test.duration_ms);
            if let Some(message) = &test.message {
                let _ = write!(out, ": {}", message.lines().next().unwrap_or_default());
            }
            out.push('\n');
        }
        let cleanup: Vec<&CleanupFailure> = self
            .suite_cleanup_failures
            .iter()
            .chain(self.tests.iter().flat_map(|test| test.cleanup_failures.iter()))
            .collect();
        if !cleanup.is_empty() {
            out.push_str("\n## Cleanup Failures\n\n");
            for failure in cleanup {
                let _ = writeln!(out, "- {}: {}", failure.fulfiller, failure.message);
            }
        }
        out
    }
}

/// Writes bytes to `path`.
fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    fs::write(path, bytes).map_err(|err| ReportError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
