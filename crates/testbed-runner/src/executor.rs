// crates/testbed-runner/src/executor.rs
// ============================================================================
// Module: Test Executors
// Description: Execution of a single discovered test inside its context.
// Purpose: Run test bodies and classify their outcome.
// Dependencies: testbed-core, testbed-discovery, thiserror, tracing
// ============================================================================

//! ## Overview
//! A [`TestExecutor`] runs one test after its requirements are fulfilled.
//! [`CommandExecutor`] runs a configured command with the test file (and the
//! result file, when present) appended, and exposes every provisioned table
//! and scratch directory visible in the test context as environment
//! variables:
//!
//! - `TESTBED_TEST_NAME`: fully qualified test name.
//! - `TESTBED_TABLE_<NAME>`: provisioned table location.
//! - `TESTBED_SCRATCH_<NAME>`: scratch directory path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::Command;
use std::process::Stdio;

use testbed_core::Context;
use testbed_discovery::ConventionBasedTest;
use thiserror::Error;
use tracing::debug;

use crate::scratch::ScratchDir;
use crate::tables::TableHandle;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Variable carrying the test name.
pub const TEST_NAME_VAR: &str = "TESTBED_TEST_NAME";
/// Prefix of table location variables.
pub const TABLE_VAR_PREFIX: &str = "TESTBED_TABLE_";
/// Prefix of scratch directory variables.
pub const SCRATCH_VAR_PREFIX: &str = "TESTBED_SCRATCH_";

// ============================================================================
// SECTION: Executor Interface
// ============================================================================

/// Terminal result of executing one test body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The test passed.
    Passed,
    /// The test chose not to run.
    Skipped(String),
    /// The test failed.
    Failed(String),
}

/// Runs a single test inside its fulfilled context.
pub trait TestExecutor: Send + Sync {
    /// Executes `test` with `context` holding its fulfilled state.
    fn execute(&self, test: &ConventionBasedTest, context: &Context) -> ExecutionOutcome;
}

// ============================================================================
// SECTION: Command Executor
// ============================================================================

/// Executor construction errors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The command argv is empty.
    #[error("executor command must not be empty")]
    EmptyCommand,
}

/// Runs an external command per test.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Program followed by its leading arguments.
    argv: Vec<String>,
    /// Exit code reporting a skip.
    skip_exit_code: i32,
}

impl CommandExecutor {
    /// Creates a command executor.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::EmptyCommand`] when `argv` is empty.
    pub fn new(argv: Vec<String>, skip_exit_code: i32) -> Result<Self, ExecutorError> {
        if argv.is_empty() {
            return Err(ExecutorError::EmptyCommand);
        }
        Ok(Self {
            argv,
            skip_exit_code,
        })
    }

    /// Builds the command for `test`.
    fn command(&self, test: &ConventionBasedTest, context: &Context) -> Command {
        let mut command = Command::new(&self.argv[0]);
        command.args(&self.argv[1 ..]).arg(test.path());
        if let Some(result_path) = test.result_path() {
            command.arg(result_path);
        }
        command.env(TEST_NAME_VAR, test.name());
        for (name, table) in context.visible::<TableHandle>() {
            if let Some(name) = name {
                command.env(env_key(TABLE_VAR_PREFIX, &name), &table.location);
            }
        }
        for (name, scratch) in context.visible::<ScratchDir>() {
            if let Some(name) = name {
                command.env(env_key(SCRATCH_VAR_PREFIX, &name), &scratch.path);
            }
        }
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        command
    }
}

impl TestExecutor for CommandExecutor {
    fn execute(&self, test: &ConventionBasedTest, context: &Context) -> ExecutionOutcome {
        let output = match self.command(test, context).output() {
            Ok(output) => output,
            Err(err) => {
                return ExecutionOutcome::Failed(format!(
                    "failed to launch `{}`: {err}",
                    self.argv[0]
                ));
            }
        };
        let code = output.status.code();
        debug!(test = test.name(), code = ?code, "test command finished");
        if output.status.success() {
            return ExecutionOutcome::Passed;
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match code {
            Some(code) if code == self.skip_exit_code => ExecutionOutcome::Skipped(stderr),
            Some(code) => ExecutionOutcome::Failed(format!("exit code {code}: {stderr}")),
            None => ExecutionOutcome::Failed(format!("terminated by signal: {stderr}")),
        }
    }
}

/// Builds an environment variable name from a state name.
fn env_key(prefix: &str, name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{prefix}{suffix}")
}
