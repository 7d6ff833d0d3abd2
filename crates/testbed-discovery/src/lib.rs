// crates/testbed-discovery/src/lib.rs
// ============================================================================
// Module: Testbed Discovery Library
// Description: Convention-based discovery of test units from a directory tree.
// Purpose: Expand a source tree into named, runnable test units.
// Dependencies: testbed-core, tempfile, thiserror, tracing
// ============================================================================

//! ## Overview
//! A [`DiscoveryEngine`] walks a root directory and hands every child entry to
//! the first [`PathTestFactory`] that accepts it. Factories recurse into
//! directories, run generator scripts into scoped temporary directories, and
//! turn leaf files into [`ConventionBasedTest`] units whose dotted names
//! mirror their position in the tree.
//!
//! A failing subtree is recorded in the [`DiscoveryOutcome`] and never stops
//! its siblings from being discovered.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod descriptor;
pub mod engine;
pub mod factory;
pub mod filter;

#[cfg(test)]
mod descriptor_tests;
#[cfg(test)]
mod filter_tests;

// ============================================================================
// SECTION: Errors
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while discovering one subtree.
///
/// # Invariants
/// - Every variant names the path it failed on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// No registered factory accepts the path.
    #[error("no path handler supports {}", .0.display())]
    UnsupportedPath(PathBuf),
    /// Filesystem failure.
    #[error("io error at {}: {message}", path.display())]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Error message.
        message: String,
    },
    /// A generator script exited unsuccessfully.
    #[error("generator {} failed ({}): {stderr}", script.display(), exit_label(*exit_code))]
    GeneratorFailed {
        /// Script path.
        script: PathBuf,
        /// Exit code, absent when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// A generator script could not be launched.
    #[error("failed to launch generator {}: {message}", script.display())]
    GeneratorSpawn {
        /// Script path.
        script: PathBuf,
        /// Error message.
        message: String,
    },
    /// A test file header is malformed.
    #[error("invalid test descriptor in {}: {message}", path.display())]
    Descriptor {
        /// Test file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },
    /// A result file has no matching test file.
    #[error("result file {} has no matching test file", .0.display())]
    OrphanResult(PathBuf),
    /// Two siblings map to the same dotted name.
    #[error(
        "{} produces test name `{name}` already used by {}",
        path.display(),
        existing.display()
    )]
    DuplicateName {
        /// Dotted name shared by both siblings.
        name: String,
        /// Rejected path.
        path: PathBuf,
        /// Sibling that claimed the name first.
        existing: PathBuf,
    },
}

impl DiscoveryError {
    /// Returns the path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::UnsupportedPath(path) | Self::OrphanResult(path) => path,
            Self::Io {
                path, ..
            }
            | Self::Descriptor {
                path, ..
            }
            | Self::DuplicateName {
                path, ..
            } => path,
            Self::GeneratorFailed {
                script, ..
            }
            | Self::GeneratorSpawn {
                script, ..
            } => script,
        }
    }
}

/// Renders a process exit code for display.
fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "terminated by signal".to_string(), |code| format!("exit code {code}"))
}

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use descriptor::TestDescriptor;
pub use engine::DiscoveryConventions;
pub use engine::DiscoveryEngine;
pub use engine::DiscoveryOutcome;
pub use factory::DirectoryFactory;
pub use factory::GeneratorScriptFactory;
pub use factory::LeafTestFactory;
pub use factory::PathTestFactory;
pub use factory::ResultFileFactory;
pub use filter::TestFilter;
pub use test::ConventionBasedTest;
pub use test::TestSummary;
