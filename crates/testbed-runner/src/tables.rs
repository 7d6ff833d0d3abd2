// crates/testbed-runner/src/tables.rs
// ============================================================================
// Module: Table Fulfillers
// Description: Table provisioning connector and the table fulfillers.
// Purpose: Turn table requirements into provisioned, context-bound tables.
// Dependencies: testbed-core, thiserror, tracing
// ============================================================================

//! ## Overview
//! Tables are provisioned through the narrow [`TableManager`] interface. The
//! bundled [`DirectoryTableManager`] copies `<datasets_dir>/<name>.*` files
//! into a per-table directory under the warehouse.
//!
//! [`ImmutableTablesFulfiller`] runs once per suite and shares its tables
//! with every test; [`MutableTablesFulfiller`] provisions a private, suffixed
//! copy for each test. Both bind a [`TableHandle`] named after the table, so
//! a test's mutable copy shadows a suite-wide table of the same name.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use testbed_core::BoundState;
use testbed_core::BoxError;
use testbed_core::Context;
use testbed_core::Fulfiller;
use testbed_core::Requirement;
use testbed_core::RequirementSet;
use testbed_core::TestStatus;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::runner::CurrentTest;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Table provisioning errors.
#[derive(Debug, Error)]
pub enum TableError {
    /// No dataset file exists for the table.
    #[error("no dataset files for table `{table}` in {}", dir.display())]
    MissingDataset {
        /// Table name.
        table: String,
        /// Datasets directory searched.
        dir: PathBuf,
    },
    /// Filesystem failure.
    #[error("table io error at {}: {message}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Error message.
        message: String,
    },
}

// ============================================================================
// SECTION: Table Types
// ============================================================================

/// What to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Suffix distinguishing a private copy.
    pub suffix: Option<String>,
}

impl TableSpec {
    /// Returns the spec of a shared table.
    #[must_use]
    pub fn shared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: None,
        }
    }

    /// Returns the spec of a private copy.
    #[must_use]
    pub fn private(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: Some(suffix.into()),
        }
    }

    /// Returns the physical table name.
    #[must_use]
    pub fn physical_name(&self) -> String {
        self.suffix
            .as_ref()
            .map_or_else(|| self.name.clone(), |suffix| format!("{}-{suffix}", self.name))
    }
}

/// A provisioned table, bound into the context under its logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    /// Logical table name.
    pub name: String,
    /// Provisioned location.
    pub location: PathBuf,
    /// True for per-test copies.
    pub mutable: bool,
}

// ============================================================================
// SECTION: Table Manager
// ============================================================================

/// Narrow connector used by the table fulfillers.
pub trait TableManager: Send + Sync {
    /// Provisions `spec` and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] when the table cannot be provisioned.
    fn provision(&self, spec: &TableSpec) -> Result<TableHandle, TableError>;

    /// Removes a provisioned table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] when the table cannot be removed.
    fn drop_table(&self, handle: &TableHandle) -> Result<(), TableError>;
}

/// Directory-backed table manager.
#[derive(Debug, Clone)]
pub struct DirectoryTableManager {
    /// Directory holding `<table>.*` dataset files.
    datasets_dir: PathBuf,
    /// Directory receiving provisioned tables.
    warehouse_dir: PathBuf,
}

impl DirectoryTableManager {
    /// Creates a manager over the given directories.
    #[must_use]
    pub fn new(datasets_dir: impl Into<PathBuf>, warehouse_dir: impl Into<PathBuf>) -> Self {
        Self {
            datasets_dir: datasets_dir.into(),
            warehouse_dir: warehouse_dir.into(),
        }
    }

    /// Returns the dataset files for `table`, sorted by name.
    fn dataset_files(&self, table: &str) -> Result<Vec<PathBuf>, TableError> {
        let prefix = format!("{table}.");
        let entries =
            fs::read_dir(&self.datasets_dir).map_err(|err| io_error(&self.datasets_dir, &err))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| io_error(&self.datasets_dir, &err))?.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix));
            if matches && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(TableError::MissingDataset {
                table: table.to_string(),
                dir: self.datasets_dir.clone(),
            });
        }
        Ok(files)
    }
}

impl TableManager for DirectoryTableManager {
    fn provision(&self, spec: &TableSpec) -> Result<TableHandle, TableError> {
        let files = self.dataset_files(&spec.name)?;
        let location = self.warehouse_dir.join(spec.physical_name());
        if location.exists() {
            fs::remove_dir_all(&location).map_err(|err| io_error(&location, &err))?;
        }
        fs::create_dir_all(&location).map_err(|err| io_error(&location, &err))?;
        for file in &files {
            let Some(file_name) = file.file_name() else {
                continue;
            };
            let target = location.join(file_name);
            fs::copy(file, &target).map_err(|err| io_error(&target, &err))?;
        }
        debug!(
            table = %spec.name,
            location = %location.display(),
            files = files.len(),
            "table provisioned"
        );
        Ok(TableHandle {
            name: spec.name.clone(),
            location,
            mutable: spec.suffix.is_some(),
        })
    }

    fn drop_table(&self, handle: &TableHandle) -> Result<(), TableError> {
        match fs::remove_dir_all(&handle.location) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&handle.location, &err)),
        }
    }
}

/// Builds a [`TableError::Io`].
fn io_error(path: &Path, err: &std::io::Error) -> TableError {
    TableError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

// ============================================================================
// SECTION: Fulfillers
// ============================================================================

/// Counter keeping private table suffixes unique within a process.
static PRIVATE_TABLE_COUNTER: AtomicU64 = AtomicU64::new(0);
/// Longest test-name fragment embedded in a private table directory name.
const MAX_OWNER_LEN: usize = 64;

/// Suite-level fulfiller for [`Requirement::ImmutableTable`].
pub struct ImmutableTablesFulfiller {
    /// Connector.
    manager: Arc<dyn TableManager>,
    /// Tables provisioned by this instance, in provisioning order.
    provisioned: Vec<TableHandle>,
}

impl ImmutableTablesFulfiller {
    /// Creates the fulfiller.
    #[must_use]
    pub fn new(manager: Arc<dyn TableManager>) -> Self {
        Self {
            manager,
            provisioned: Vec::new(),
        }
    }
}

impl Fulfiller for ImmutableTablesFulfiller {
    fn fulfill(
        &mut self,
        requirements: &RequirementSet,
        _context: &Context,
    ) -> Result<Vec<BoundState>, BoxError> {
        for requirement in requirements {
            if let Requirement::ImmutableTable(name) = requirement {
                let handle = provision_or_rollback(
                    self.manager.as_ref(),
                    &mut self.provisioned,
                    &TableSpec::shared(name.clone()),
                )?;
                self.provisioned.push(handle);
            }
        }
        Ok(bind_handles(&self.provisioned))
    }

    fn cleanup(&mut self, _status: TestStatus, _context: &Context) -> Result<(), BoxError> {
        drop_all(self.manager.as_ref(), &mut self.provisioned)
    }
}

/// Test-level fulfiller for [`Requirement::MutableTable`].
pub struct MutableTablesFulfiller {
    /// Connector.
    manager: Arc<dyn TableManager>,
    /// Keep copies of failed tests.
    preserve_on_failure: bool,
    /// Tables provisioned by this instance, in provisioning order.
    provisioned: Vec<TableHandle>,
}

impl MutableTablesFulfiller {
    /// Creates the fulfiller.
    #[must_use]
    pub fn new(manager: Arc<dyn TableManager>, preserve_on_failure: bool) -> Self {
        Self {
            manager,
            preserve_on_failure,
            provisioned: Vec::new(),
        }
    }
}

impl Fulfiller for MutableTablesFulfiller {
    fn fulfill(
        &mut self,
        requirements: &RequirementSet,
        context: &Context,
    ) -> Result<Vec<BoundState>, BoxError> {
        let owner = context
            .get::<CurrentTest>()
            .map_or_else(|| "adhoc".to_string(), |test| sanitize(&test.name));
        for requirement in requirements {
            if let Requirement::MutableTable(name) = requirement {
                let sequence = PRIVATE_TABLE_COUNTER.fetch_add(1, Ordering::Relaxed);
                let spec = TableSpec::private(name.clone(), format!("{owner}-{sequence}"));
                let handle =
                    provision_or_rollback(self.manager.as_ref(), &mut self.provisioned, &spec)?;
                self.provisioned.push(handle);
            }
        }
        Ok(bind_handles(&self.provisioned))
    }

    fn cleanup(&mut self, status: TestStatus, _context: &Context) -> Result<(), BoxError> {
        if status == TestStatus::Failed && self.preserve_on_failure {
            for handle in self.provisioned.drain(..) {
                info!(
                    table = %handle.name,
                    location = %handle.location.display(),
                    "preserving table of failed test"
                );
            }
            return Ok(());
        }
        drop_all(self.manager.as_ref(), &mut self.provisioned)
    }
}

/// Provisions `spec`, dropping `provisioned` if it fails.
fn provision_or_rollback(
    manager: &dyn TableManager,
    provisioned: &mut Vec<TableHandle>,
    spec: &TableSpec,
) -> Result<TableHandle, BoxError> {
    match manager.provision(spec) {
        Ok(handle) => Ok(handle),
        Err(err) => {
            if let Err(rollback) = drop_all(manager, provisioned) {
                warn!(error = %rollback, "table rollback failed");
            }
            Err(err.into())
        }
    }
}

/// Drops every table in reverse order, reporting the first failure.
fn drop_all(
    manager: &dyn TableManager,
    provisioned: &mut Vec<TableHandle>,
) -> Result<(), BoxError> {
    let mut first_error = None;
    while let Some(handle) = provisioned.pop() {
        if let Err(err) = manager.drop_table(&handle) {
            warn!(table = %handle.name, error = %err, "failed to drop table");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), |err| Err(err.into()))
}

/// Binds each handle under its logical table name.
fn bind_handles(handles: &[TableHandle]) -> Vec<BoundState> {
    handles.iter().map(|handle| BoundState::named(handle.name.clone(), handle.clone())).collect()
}

/// Makes a test name usable inside a directory name.
///
/// Only the trailing [`MAX_OWNER_LEN`] characters are kept; the leaf segments
/// identify the test and the process counter keeps the name unique.
fn sanitize(name: &str) -> String {
    let skip = name.chars().count().saturating_sub(MAX_OWNER_LEN);
    name.chars().skip(skip).map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' }).collect()
}
