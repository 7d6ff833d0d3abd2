// crates/testbed-runner/src/scratch.rs
// ============================================================================
// Module: Scratch Directory Fulfiller
// Description: Per-test temporary directories.
// Purpose: Provide isolated scratch space released after each test.
// Dependencies: tempfile, testbed-core, tracing
// ============================================================================

//! ## Overview
//! Each [`Requirement::ScratchDirectory`] gets a fresh temporary directory
//! bound as a [`ScratchDir`] under the requirement's name. Directories are
//! removed on cleanup, or kept on disk when the test failed and
//! preservation is enabled.

use std::path::PathBuf;

use tempfile::TempDir;
use testbed_core::BoundState;
use testbed_core::BoxError;
use testbed_core::Context;
use testbed_core::Fulfiller;
use testbed_core::Requirement;
use testbed_core::RequirementSet;
use testbed_core::TestStatus;
use tracing::info;

/// Prefix of scratch directory names.
const SCRATCH_PREFIX: &str = "testbed-scratch-";

/// A scratch directory bound into a test context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDir {
    /// Requirement name.
    pub name: String,
    /// Directory path.
    pub path: PathBuf,
}

/// Test-level fulfiller for scratch directories.
#[derive(Debug, Default)]
pub struct ScratchDirectoryFulfiller {
    /// Keep directories of failed tests.
    preserve_on_failure: bool,
    /// Directories created by this instance.
    dirs: Vec<(String, TempDir)>,
}

impl ScratchDirectoryFulfiller {
    /// Creates the fulfiller.
    #[must_use]
    pub const fn new(preserve_on_failure: bool) -> Self {
        Self {
            preserve_on_failure,
            dirs: Vec::new(),
        }
    }
}

impl Fulfiller for ScratchDirectoryFulfiller {
    fn fulfill(
        &mut self,
        requirements: &RequirementSet,
        _context: &Context,
    ) -> Result<Vec<BoundState>, BoxError> {
        let mut states = Vec::new();
        for requirement in requirements {
            if let Requirement::ScratchDirectory(name) = requirement {
                let dir = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir()?;
                states.push(BoundState::named(name.clone(), ScratchDir {
                    name: name.clone(),
                    path: dir.path().to_path_buf(),
                }));
                self.dirs.push((name.clone(), dir));
            }
        }
        Ok(states)
    }

    fn cleanup(&mut self, status: TestStatus, _context: &Context) -> Result<(), BoxError> {
        let preserve = status == TestStatus::Failed && self.preserve_on_failure;
        let mut first_error = None;
        for (name, dir) in self.dirs.drain(..).rev() {
            if preserve {
                let path = dir.keep();
                info!(
                    scratch = %name,
                    path = %path.display(),
                    "preserving scratch dir of failed test"
                );
            } else if let Err(err) = dir.close() {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), |err| Err(err.into()))
    }
}
