// crates/testbed-discovery/src/factory.rs
// ============================================================================
// Module: Path Test Factories
// Description: Pluggable handlers that expand filesystem entries into tests.
// Purpose: Recognise one class of path each and turn it into test units.
// Dependencies: tempfile, testbed-core, tracing
// ============================================================================

//! ## Overview
//! Each [`PathTestFactory`] recognises one class of filesystem entry. The
//! engine asks its factories in order and delegates to the first match, so
//! the generator factory must precede the leaf and directory factories.
//!
//! Generator protocol: the script is made executable and invoked as
//! `<script> <empty-output-dir>`; on a zero exit the output directory is
//! discovered under the same name prefix the script itself would have had.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::process::Output;
use std::process::Stdio;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use testbed_core::RunEvent;
use testbed_core::RunEventSink;
use testbed_core::now_millis;
use tracing::debug;
use tracing::warn;

use crate::DiscoveryError;
use crate::descriptor::TestDescriptor;
use crate::engine::DiscoveryEngine;
use crate::engine::DiscoveryOutcome;
use crate::engine::child_prefix;
use crate::engine::ensure_no_symlink_loop;
use crate::test::ConventionBasedTest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix for generator output directories.
const GENERATOR_DIR_PREFIX: &str = "testbed-gen-";
/// Launch attempts when the freshly chmodded script is still busy.
const SPAWN_ATTEMPTS: u32 = 5;
/// Pause between busy-script launch attempts.
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(20);

// ============================================================================
// SECTION: Factory Interface
// ============================================================================

/// Handler expanding one class of filesystem entry into test units.
pub trait PathTestFactory: Send + Sync {
    /// Returns a short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Returns true when this factory handles `path`.
    fn is_supported_path(&self, path: &Path) -> bool;

    /// Expands `path` into test units named under `name_prefix`.
    ///
    /// `name_prefix` is the prefix of the directory containing `path`. Nested
    /// failures that leave siblings discoverable are returned inside the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when `path` as a whole cannot be expanded.
    fn create_tests_for_path(
        &self,
        path: &Path,
        name_prefix: &str,
        engine: &DiscoveryEngine,
    ) -> Result<DiscoveryOutcome, DiscoveryError>;
}

// ============================================================================
// SECTION: Directory Factory
// ============================================================================

/// Recurses into sub-directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryFactory;

impl PathTestFactory for DirectoryFactory {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn is_supported_path(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_tests_for_path(
        &self,
        path: &Path,
        name_prefix: &str,
        engine: &DiscoveryEngine,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        ensure_no_symlink_loop(path)?;
        engine.create_tests_for_children_of_path(path, &child_prefix(name_prefix, path))
    }
}

// ============================================================================
// SECTION: Leaf Test Factory
// ============================================================================

/// Turns a test file into a single test unit.
#[derive(Debug, Clone)]
pub struct LeafTestFactory {
    /// Test file extension.
    test_extension: String,
    /// Companion result file extension.
    result_extension: String,
}

impl LeafTestFactory {
    /// Creates a leaf factory for the given extensions.
    #[must_use]
    pub fn new(test_extension: impl Into<String>, result_extension: impl Into<String>) -> Self {
        Self {
            test_extension: test_extension.into(),
            result_extension: result_extension.into(),
        }
    }
}

impl PathTestFactory for LeafTestFactory {
    fn name(&self) -> &'static str {
        "leaf-test"
    }

    fn is_supported_path(&self, path: &Path) -> bool {
        path.is_file() && has_extension(path, &self.test_extension)
    }

    fn create_tests_for_path(
        &self,
        path: &Path,
        name_prefix: &str,
        _engine: &DiscoveryEngine,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let descriptor = TestDescriptor::load(path)?;
        let result_path = path.with_extension(&self.result_extension);
        let result_path = result_path.is_file().then_some(result_path);
        let test = ConventionBasedTest::new(
            child_prefix(name_prefix, path),
            path,
            result_path,
            descriptor,
        );
        Ok(DiscoveryOutcome::from_tests(vec![test]))
    }
}

// ============================================================================
// SECTION: Result File Factory
// ============================================================================

/// Accepts companion result files, which produce no tests of their own.
#[derive(Debug, Clone)]
pub struct ResultFileFactory {
    /// Test file extension the result must accompany.
    test_extension: String,
    /// Result file extension.
    result_extension: String,
}

impl ResultFileFactory {
    /// Creates a result factory for the given extensions.
    #[must_use]
    pub fn new(test_extension: impl Into<String>, result_extension: impl Into<String>) -> Self {
        Self {
            test_extension: test_extension.into(),
            result_extension: result_extension.into(),
        }
    }
}

impl PathTestFactory for ResultFileFactory {
    fn name(&self) -> &'static str {
        "result-file"
    }

    fn is_supported_path(&self, path: &Path) -> bool {
        path.is_file() && has_extension(path, &self.result_extension)
    }

    fn create_tests_for_path(
        &self,
        path: &Path,
        _name_prefix: &str,
        _engine: &DiscoveryEngine,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        if path.with_extension(&self.test_extension).is_file() {
            Ok(DiscoveryOutcome::default())
        } else {
            Err(DiscoveryError::OrphanResult(path.to_path_buf()))
        }
    }
}

// ============================================================================
// SECTION: Generator Script Factory
// ============================================================================

/// Runs generator scripts and discovers their output.
pub struct GeneratorScriptFactory {
    /// Generator script extension.
    extension: String,
    /// Event sink for generator invocations.
    events: Arc<dyn RunEventSink>,
}

impl GeneratorScriptFactory {
    /// Creates a generator factory for scripts with `extension`.
    #[must_use]
    pub fn new(extension: impl Into<String>, events: Arc<dyn RunEventSink>) -> Self {
        Self {
            extension: extension.into(),
            events,
        }
    }

    /// Runs `script` with `output_dir` as its only argument.
    fn invoke(&self, script: &Path, output_dir: &Path) -> Result<(), DiscoveryError> {
        make_executable(script)?;
        let output = spawn_with_retry(script, output_dir).map_err(|err| {
            DiscoveryError::GeneratorSpawn {
                script: script.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        let success = output.status.success();
        self.events.record(&RunEvent::GeneratorInvoked {
            timestamp_ms: now_millis(),
            script: script.display().to_string(),
            exit_code: output.status.code(),
            success,
        });
        if success {
            debug!(script = %script.display(), "generator finished");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(script = %script.display(), code = ?output.status.code(), "generator failed");
        Err(DiscoveryError::GeneratorFailed {
            script: script.to_path_buf(),
            exit_code: output.status.code(),
            stderr,
        })
    }
}

impl PathTestFactory for GeneratorScriptFactory {
    fn name(&self) -> &'static str {
        "generator-script"
    }

    fn is_supported_path(&self, path: &Path) -> bool {
        path.is_file() && has_extension(path, &self.extension)
    }

    fn create_tests_for_path(
        &self,
        path: &Path,
        name_prefix: &str,
        engine: &DiscoveryEngine,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let output_dir = tempfile::Builder::new().prefix(GENERATOR_DIR_PREFIX).tempdir().map_err(
            |err| DiscoveryError::Io {
                path: std::env::temp_dir(),
                message: err.to_string(),
            },
        )?;
        self.invoke(path, output_dir.path())?;
        let prefix = child_prefix(name_prefix, path);
        let mut outcome = engine.create_tests_for_children_of_path(output_dir.path(), &prefix)?;
        let output_dir = Arc::new(output_dir);
        outcome.retain_generated_dir(&output_dir);
        Ok(outcome)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true when `path` has exactly `extension`.
fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext == extension)
}

/// Adds execute permission for every class that can read the script.
#[cfg(unix)]
fn make_executable(script: &Path) -> Result<(), DiscoveryError> {
    use std::os::unix::fs::PermissionsExt;

    let io_error = |err: io::Error| DiscoveryError::Io {
        path: script.to_path_buf(),
        message: err.to_string(),
    };
    let mut permissions = fs::metadata(script).map_err(io_error)?.permissions();
    let mode = permissions.mode();
    let executable = mode | ((mode & 0o444) >> 2);
    if executable != mode {
        permissions.set_mode(executable);
        fs::set_permissions(script, permissions).map_err(io_error)?;
    }
    Ok(())
}

/// Scripts on non-unix targets are launched as-is.
#[cfg(not(unix))]
fn make_executable(_script: &Path) -> Result<(), DiscoveryError> {
    Ok(())
}

/// Spawns the generator, retrying while the kernel reports the file busy.
fn spawn_with_retry(script: &Path, output_dir: &Path) -> io::Result<Output> {
    let mut attempt = 1;
    loop {
        let result = Command::new(script)
            .arg(output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        match result {
            Err(err)
                if err.kind() == io::ErrorKind::ExecutableFileBusy && attempt < SPAWN_ATTEMPTS =>
            {
                attempt += 1;
                thread::sleep(SPAWN_RETRY_DELAY);
            }
            other => return other,
        }
    }
}
