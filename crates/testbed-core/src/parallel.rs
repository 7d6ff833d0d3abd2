// crates/testbed-core/src/parallel.rs
// ============================================================================
// Module: Parallel Execution
// Description: Indexed parallel workers with private child contexts.
// Purpose: Run concurrent work and surface every failure, in launch order.
// Dependencies: thiserror, tracing
// ============================================================================

//! ## Overview
//! [`run_parallel`] snapshots the parent context once, derives one private
//! child per worker, and runs every worker on its own scoped thread with its
//! own [`ContextStack`]. Workers never see each other's bindings and the
//! parent is only read, so no stack locking is needed.
//!
//! Invariants:
//! - Every worker is joined before the call returns; there is no fail-fast
//!   and no cancellation.
//! - Failures (errors and panics) are aggregated in worker-index order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::debug;

use crate::BoxError;
use crate::context::Context;
use crate::context::ContextStack;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Why a single worker failed.
#[derive(Debug, Error)]
pub enum WorkerCause {
    /// The worker body returned an error.
    #[error("{0}")]
    Error(BoxError),
    /// The worker body panicked.
    #[error("panicked: {0}")]
    Panic(String),
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Failure of one indexed worker.
#[derive(Debug)]
pub struct WorkerFailure {
    /// Launch index of the worker.
    pub index: usize,
    /// Failure cause.
    pub cause: WorkerCause,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {}: {}", self.index, self.cause)
    }
}

/// Every failure raised by one [`run_parallel`] call, in worker-index order.
#[derive(Debug, Error)]
#[error("{} of {} parallel workers failed: {}", .failures.len(), .launched, join_failures(.failures))]
pub struct AggregatedFailure {
    /// Number of workers launched.
    launched: usize,
    /// Failures ordered by worker index.
    failures: Vec<WorkerFailure>,
}

impl AggregatedFailure {
    /// Returns the number of workers launched.
    #[must_use]
    pub const fn launched(&self) -> usize {
        self.launched
    }

    /// Returns the failures in worker-index order.
    #[must_use]
    pub fn failures(&self) -> &[WorkerFailure] {
        &self.failures
    }

    /// Returns the indices of the failed workers.
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.failures.iter().map(|failure| failure.index).collect()
    }

    /// Consumes the aggregate, returning the failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<WorkerFailure> {
        self.failures
    }
}

/// Joins failure descriptions for display.
fn join_failures(failures: &[WorkerFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

// ============================================================================
// SECTION: Parallel Execution
// ============================================================================

/// Runs `body(index, stack)` for every index in `0..count` concurrently.
///
/// Each worker receives a fresh [`ContextStack`] whose only frame is a
/// private child of `parent`. The call blocks until every worker finishes.
///
/// # Errors
///
/// Returns [`AggregatedFailure`] holding every worker error or panic, ordered
/// by worker index, once all workers have completed.
pub fn run_parallel<F, E>(
    parent: &Arc<Context>,
    count: usize,
    body: F,
) -> Result<(), AggregatedFailure>
where
    F: Fn(usize, &mut ContextStack) -> Result<(), E> + Sync,
    E: Into<BoxError>,
{
    if count == 0 {
        return Ok(());
    }
    let body = &body;
    let results: Vec<Result<(), WorkerCause>> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let child = parent.create_child_context();
            let spawned = thread::Builder::new()
                .name(format!("testbed-worker-{index}"))
                .spawn_scoped(scope, move || {
                    let mut stack = ContextStack::with_root(child);
                    body(index, &mut stack).map_err(|err| WorkerCause::Error(err.into()))
                });
            handles.push(spawned);
        }
        handles
            .into_iter()
            .map(|spawned| match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|payload| {
                    Err(WorkerCause::Panic(panic_message(payload.as_ref())))
                }),
                Err(err) => Err(WorkerCause::Spawn(err.to_string())),
            })
            .collect()
    });

    let failures: Vec<WorkerFailure> = results
        .into_iter()
        .enumerate()
        .filter_map(|(index, result)| {
            result.err().map(|cause| WorkerFailure {
                index,
                cause,
            })
        })
        .collect();
    debug!(workers = count, failed = failures.len(), "parallel workers joined");
    if failures.is_empty() {
        return Ok(());
    }
    Err(AggregatedFailure {
        launched: count,
        failures,
    })
}

/// Extracts a readable message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}
