// crates/testbed-discovery/src/engine.rs
// ============================================================================
// Module: Discovery Engine
// Description: Ordered dispatch of directory entries to path test factories.
// Purpose: Walk a source tree and collect tests and per-subtree failures.
// Dependencies: testbed-core, tracing
// ============================================================================

//! ## Overview
//! The engine visits the immediate children of a directory in file-name order
//! and hands each to the first factory whose `is_supported_path` accepts it.
//! Factories may recurse back into the engine. Each child is an isolation
//! boundary: its failure is recorded and discovery moves on to the next
//! sibling.
//!
//! Naming: every step appends one segment to the dotted prefix. A segment is
//! the file stem (or directory name) with any `.` replaced by `_`, so a name
//! always has exactly one segment per tree level. Within one directory the
//! first child (in name order) to produce tests under a segment owns it; a
//! later sibling with the same segment fails with
//! [`DiscoveryError::DuplicateName`].
//!
//! Symlinked directories are followed unless they point back at an ancestor,
//! which is reported as an [`DiscoveryError::Io`] error for the link.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use testbed_core::NoopEventSink;
use testbed_core::RunEvent;
use testbed_core::RunEventSink;
use testbed_core::now_millis;
use tempfile::TempDir;
use tracing::debug;
use tracing::warn;

use crate::DiscoveryError;
use crate::factory::DirectoryFactory;
use crate::factory::GeneratorScriptFactory;
use crate::factory::LeafTestFactory;
use crate::factory::PathTestFactory;
use crate::factory::ResultFileFactory;
use crate::test::ConventionBasedTest;

// ============================================================================
// SECTION: Conventions
// ============================================================================

/// File naming conventions used to build the default factory chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConventions {
    /// Extension of leaf test files.
    pub test_extension: String,
    /// Extension of companion result files.
    pub result_extension: String,
    /// Extension of generator scripts.
    pub generator_extension: String,
    /// Root name prefix; defaults to the root directory name.
    pub name_prefix: Option<String>,
}

impl Default for DiscoveryConventions {
    fn default() -> Self {
        Self {
            test_extension: "sql".to_string(),
            result_extension: "result".to_string(),
            generator_extension: "generator".to_string(),
            name_prefix: None,
        }
    }
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Tests discovered under a path plus the subtrees that failed.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// Discovered tests, in traversal order.
    pub tests: Vec<ConventionBasedTest>,
    /// Failed subtrees, in traversal order.
    pub errors: Vec<DiscoveryError>,
}

impl DiscoveryOutcome {
    /// Builds an outcome holding `tests` and no errors.
    #[must_use]
    pub const fn from_tests(tests: Vec<ConventionBasedTest>) -> Self {
        Self {
            tests,
            errors: Vec::new(),
        }
    }

    /// Returns true when no subtree failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the discovered test names in traversal order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tests.iter().map(ConventionBasedTest::name).collect()
    }

    /// Appends another outcome.
    pub fn merge(&mut self, other: Self) {
        self.tests.extend(other.tests);
        self.errors.extend(other.errors);
    }

    /// Ties `dir` to every test in the outcome.
    pub(crate) fn retain_generated_dir(&mut self, dir: &Arc<TempDir>) {
        for test in &mut self.tests {
            test.retain_generated_dir(Arc::clone(dir));
        }
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Convention-based discovery engine.
pub struct DiscoveryEngine {
    /// Factories in dispatch order; the first match wins.
    factories: Vec<Box<dyn PathTestFactory>>,
    /// Root name prefix override.
    name_prefix: Option<String>,
    /// Event sink for discovery failures.
    events: Arc<dyn RunEventSink>,
}

impl DiscoveryEngine {
    /// Creates an engine with an explicit factory chain.
    #[must_use]
    pub fn new(factories: Vec<Box<dyn PathTestFactory>>) -> Self {
        Self {
            factories,
            name_prefix: None,
            events: Arc::new(NoopEventSink),
        }
    }

    /// Creates the standard engine: generator scripts, leaf tests, result
    /// files, then directories.
    #[must_use]
    pub fn with_conventions(
        conventions: &DiscoveryConventions,
        events: Arc<dyn RunEventSink>,
    ) -> Self {
        let factories: Vec<Box<dyn PathTestFactory>> = vec![
            Box::new(GeneratorScriptFactory::new(
                conventions.generator_extension.clone(),
                Arc::clone(&events),
            )),
            Box::new(LeafTestFactory::new(
                conventions.test_extension.clone(),
                conventions.result_extension.clone(),
            )),
            Box::new(ResultFileFactory::new(
                conventions.test_extension.clone(),
                conventions.result_extension.clone(),
            )),
            Box::new(DirectoryFactory),
        ];
        Self {
            factories,
            name_prefix: conventions.name_prefix.clone(),
            events,
        }
    }

    /// Overrides the root name prefix.
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Replaces the event sink used for discovery failures.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn RunEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the factory names in dispatch order.
    #[must_use]
    pub fn factory_names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|factory| factory.name()).collect()
    }

    /// Discovers every test under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when `root` is not a readable directory.
    pub fn discover(&self, root: &Path) -> Result<DiscoveryOutcome, DiscoveryError> {
        if !root.is_dir() {
            return Err(DiscoveryError::Io {
                path: root.to_path_buf(),
                message: "discovery root is not a directory".to_string(),
            });
        }
        let prefix = self.name_prefix.clone().unwrap_or_else(|| {
            root.canonicalize()
                .map_or_else(|_| segment_for(root), |absolute| segment_for(&absolute))
        });
        let outcome = self.create_tests_for_children_of_path(root, &prefix)?;
        debug!(
            root = %root.display(),
            tests = outcome.tests.len(),
            errors = outcome.errors.len(),
            "discovery finished"
        );
        Ok(outcome)
    }

    /// Expands every immediate child of `path` under `name_prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Io`] when `path` cannot be listed. Failures
    /// of individual children are collected in the outcome instead.
    pub fn create_tests_for_children_of_path(
        &self,
        path: &Path,
        name_prefix: &str,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let mut outcome = DiscoveryOutcome::default();
        let mut claimed: BTreeMap<String, PathBuf> = BTreeMap::new();
        for child in sorted_children(path)? {
            let result = self
                .create_tests_for_path(&child, name_prefix)
                .and_then(|found| claim_segment(&mut claimed, &child, name_prefix, found));
            match result {
                Ok(found) => outcome.merge(found),
                Err(err) => {
                    warn!(path = %child.display(), error = %err, "discovery failed for subtree");
                    self.events.record(&RunEvent::DiscoveryFailed {
                        timestamp_ms: now_millis(),
                        path: child.display().to_string(),
                        error: err.to_string(),
                    });
                    outcome.errors.push(err);
                }
            }
        }
        Ok(outcome)
    }

    /// Dispatches one path to the first factory that supports it.
    fn create_tests_for_path(
        &self,
        path: &Path,
        name_prefix: &str,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let factory = self
            .factories
            .iter()
            .find(|factory| factory.is_supported_path(path))
            .ok_or_else(|| DiscoveryError::UnsupportedPath(path.to_path_buf()))?;
        factory.create_tests_for_path(path, name_prefix, self)
    }
}

// ============================================================================
// SECTION: Naming
// ============================================================================

/// Returns the dotted name for `path` nested under `prefix`.
pub(crate) fn child_prefix(prefix: &str, path: &Path) -> String {
    let segment = segment_for(path);
    if prefix.is_empty() { segment } else { format!("{prefix}.{segment}") }
}

/// Returns the name segment contributed by `path`.
fn segment_for(path: &Path) -> String {
    let raw = if path.is_dir() { path.file_name() } else { path.file_stem() };
    raw.map_or_else(String::new, |raw| raw.to_string_lossy().replace('.', "_"))
}

/// Reserves the name segment of `child` for the tests it produced.
///
/// Siblings whose segments collide (`a.b.sql` and `a_b.sql`, or `x.sql` and
/// `x.generator`) would share a dotted name; the later one is rejected.
fn claim_segment(
    claimed: &mut BTreeMap<String, PathBuf>,
    child: &Path,
    name_prefix: &str,
    found: DiscoveryOutcome,
) -> Result<DiscoveryOutcome, DiscoveryError> {
    if found.tests.is_empty() {
        return Ok(found);
    }
    let segment = segment_for(child);
    if let Some(existing) = claimed.get(&segment) {
        return Err(DiscoveryError::DuplicateName {
            name: child_prefix(name_prefix, child),
            path: child.to_path_buf(),
            existing: existing.clone(),
        });
    }
    claimed.insert(segment, child.to_path_buf());
    Ok(found)
}

/// Rejects a symlinked directory that points back at one of its ancestors.
pub(crate) fn ensure_no_symlink_loop(path: &Path) -> Result<(), DiscoveryError> {
    let io_error = |err: std::io::Error| DiscoveryError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    if !fs::symlink_metadata(path).map_err(io_error)?.file_type().is_symlink() {
        return Ok(());
    }
    let target = path.canonicalize().map_err(io_error)?;
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let parent = parent.canonicalize().map_err(io_error)?;
    if parent.starts_with(&target) {
        return Err(DiscoveryError::Io {
            path: path.to_path_buf(),
            message: format!("symbolic link loops back to ancestor {}", target.display()),
        });
    }
    Ok(())
}

/// Lists the children of `path` sorted by file name.
fn sorted_children(path: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let io_error = |err: std::io::Error| DiscoveryError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let mut children = Vec::new();
    for entry in fs::read_dir(path).map_err(io_error)? {
        children.push(entry.map_err(io_error)?.path());
    }
    children.sort_by(|left, right| left.file_name().cmp(&right.file_name()));
    Ok(children)
}
