// crates/testbed-runner/src/lib.rs
// ============================================================================
// Module: Testbed Runner Library
// Description: Suite execution, built-in fulfillers, and run reports.
// Purpose: Run discovered tests with scoped setup and teardown.
// Dependencies: testbed-core, testbed-discovery, tempfile, serde_jcs, tracing
// ============================================================================

//! ## Overview
//! The runner turns a list of discovered tests into a [`RunReport`]. Tables
//! and scratch directories are provided by the built-in fulfillers assembled
//! in [`standard_registry`]; test bodies run through a [`TestExecutor`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod executor;
pub mod report;
pub mod runner;
pub mod scratch;
pub mod tables;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use testbed_core::ContextError;
use testbed_core::FulfillerRegistration;
use testbed_core::FulfillerRegistry;
use testbed_core::FulfillmentLevel;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the suite runner itself.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The context stack was misused.
    #[error("context error: {0}")]
    Context(#[from] ContextError),
}

// ============================================================================
// SECTION: Registry Assembly
// ============================================================================

/// Name of the suite-level table fulfiller.
pub const IMMUTABLE_TABLES: &str = "immutable-tables";
/// Name of the test-level table fulfiller.
pub const MUTABLE_TABLES: &str = "mutable-tables";
/// Name of the scratch directory fulfiller.
pub const SCRATCH_DIRECTORIES: &str = "scratch-directories";
/// Priority of the scratch fulfiller; it runs after the table fulfillers.
pub const SCRATCH_PRIORITY: i32 = 10;

/// Builds the registry of built-in fulfillers.
///
/// Table fulfillers are registered only when a table manager is supplied.
#[must_use]
pub fn standard_registry(
    tables: Option<Arc<dyn TableManager>>,
    preserve_on_failure: bool,
) -> FulfillerRegistry {
    let mut registry = FulfillerRegistry::new();
    if let Some(manager) = tables {
        let shared = Arc::clone(&manager);
        registry.register(FulfillerRegistration::new(
            IMMUTABLE_TABLES,
            FulfillmentLevel::Suite,
            move || ImmutableTablesFulfiller::new(Arc::clone(&shared)),
        ));
        registry.register(FulfillerRegistration::new(
            MUTABLE_TABLES,
            FulfillmentLevel::Test,
            move || MutableTablesFulfiller::new(Arc::clone(&manager), preserve_on_failure),
        ));
    }
    registry.register(
        FulfillerRegistration::new(SCRATCH_DIRECTORIES, FulfillmentLevel::Test, move || {
            ScratchDirectoryFulfiller::new(preserve_on_failure)
        })
        .with_priority(SCRATCH_PRIORITY),
    );
    registry
}

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use executor::CommandExecutor;
pub use executor::ExecutionOutcome;
pub use executor::ExecutorError;
pub use executor::TestExecutor;
pub use report::ReportError;
pub use report::RunReport;
pub use report::TestOutcome;
pub use runner::CurrentTest;
pub use runner::SuiteRunner;
pub use scratch::ScratchDir;
pub use scratch::ScratchDirectoryFulfiller;
pub use tables::DirectoryTableManager;
pub use tables::ImmutableTablesFulfiller;
pub use tables::MutableTablesFulfiller;
pub use tables::TableError;
pub use tables::TableHandle;
pub use tables::TableManager;
pub use tables::TableSpec;
