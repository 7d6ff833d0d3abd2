// crates/testbed-core/src/fulfillment.rs
// ============================================================================
// Module: Requirement Fulfillment Pipeline
// Description: Ordered fulfiller registry with symmetric, best-effort cleanup.
// Purpose: Turn declared requirements into provisioned state bound in a context.
// Dependencies: thiserror, tracing
// ============================================================================

//! ## Overview
//! Fulfillers are registered explicitly, each with a [`FulfillmentLevel`] and
//! an integer priority, through a [`FulfillerRegistry`] built at process
//! start. A [`FulfillmentPipeline`] selects the registrations for one level,
//! orders them by ascending priority (ties keep registration order) and
//! instantiates fresh fulfillers for every scope it fulfills, so concurrent
//! tests never share fulfiller state.
//!
//! Invariants:
//! - Each fulfiller sees the full deduplicated requirement set and picks the
//!   requirements it understands.
//! - A failed fulfillment stops the remaining fulfillers at that level; the
//!   already-completed ones are cleaned up in reverse order before the error
//!   is returned.
//! - Cleanup runs in exact reverse fulfillment order. Cleanup failures and
//!   panics are suppressed, logged, and recorded as
//!   [`RunEvent::CleanupFailed`]; every fulfiller still gets its cleanup call.
//! - A [`FulfilledScope`] dropped without an explicit cleanup cleans up with
//!   [`TestStatus::Failed`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::BoxError;
use crate::context::BoundState;
use crate::context::Context;
use crate::events::RunEvent;
use crate::events::RunEventSink;
use crate::events::now_millis;
use crate::parallel::panic_message;
use crate::requirements::FulfillmentLevel;
use crate::requirements::Requirement;
use crate::requirements::RequirementSet;
use crate::requirements::TestStatus;

// ============================================================================
// SECTION: Fulfiller Trait
// ============================================================================

/// Actor that satisfies requirements and produces bound state.
///
/// A fresh instance is created for every scope, so implementations may keep
/// the handles they need for cleanup in `self`.
pub trait Fulfiller: Send {
    /// Satisfies the requirements this fulfiller understands.
    ///
    /// # Errors
    ///
    /// Returns an error when provisioning fails; remaining fulfillers at the
    /// same level are then skipped.
    fn fulfill(
        &mut self,
        requirements: &RequirementSet,
        context: &Context,
    ) -> Result<Vec<BoundState>, BoxError>;

    /// Releases whatever [`Fulfiller::fulfill`] provisioned.
    ///
    /// # Errors
    ///
    /// Returns an error when teardown fails. The error is logged and
    /// suppressed by the pipeline.
    fn cleanup(&mut self, _status: TestStatus, _context: &Context) -> Result<(), BoxError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Constructor producing a fresh fulfiller instance.
type FulfillerFactory = dyn Fn() -> Box<dyn Fulfiller> + Send + Sync;

/// Registration of a fulfiller constructor with its level and priority.
#[derive(Clone)]
pub struct FulfillerRegistration {
    /// Stable fulfiller name used in logs and events.
    name: String,
    /// Level the fulfiller runs at.
    level: FulfillmentLevel,
    /// Ordering priority; lower values fulfill earlier and clean up later.
    priority: i32,
    /// Constructor for fresh instances.
    factory: Arc<FulfillerFactory>,
}

impl FulfillerRegistration {
    /// Creates a registration with the default priority of zero.
    pub fn new<F, T>(name: impl Into<String>, level: FulfillmentLevel, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Fulfiller + 'static,
    {
        Self {
            name: name.into(),
            level,
            priority: 0,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Fulfiller>),
        }
    }

    /// Returns the registration with `priority` set.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the fulfiller name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fulfillment level.
    #[must_use]
    pub const fn level(&self) -> FulfillmentLevel {
        self.level
    }

    /// Returns the priority.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Creates a fresh fulfiller instance.
    fn instantiate(&self) -> Box<dyn Fulfiller> {
        (self.factory)()
    }
}

impl fmt::Debug for FulfillerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FulfillerRegistration")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Explicit, ordered registry of fulfillers.
#[derive(Debug, Clone, Default)]
pub struct FulfillerRegistry {
    /// Registrations in registration order.
    registrations: Vec<FulfillerRegistration>,
}

impl FulfillerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Adds a registration.
    pub fn register(&mut self, registration: FulfillerRegistration) {
        self.registrations.push(registration);
    }

    /// Returns the registry with `registration` added.
    #[must_use]
    pub fn with(mut self, registration: FulfillerRegistration) -> Self {
        self.register(registration);
        self
    }

    /// Returns the registrations for `level`, sorted by ascending priority.
    /// Ties keep registration order.
    #[must_use]
    pub fn for_level(&self, level: FulfillmentLevel) -> Vec<FulfillerRegistration> {
        let mut selected: Vec<FulfillerRegistration> = self
            .registrations
            .iter()
            .filter(|registration| registration.level == level)
            .cloned()
            .collect();
        selected.sort_by_key(FulfillerRegistration::priority);
        selected
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns true when no fulfiller is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

// ============================================================================
// SECTION: Errors and Reports
// ============================================================================

/// A fulfiller failed during setup.
#[derive(Debug, Error)]
#[error("{level} fulfiller `{fulfiller}` failed: {source}")]
pub struct FulfillmentError {
    /// Level being fulfilled.
    pub level: FulfillmentLevel,
    /// Name of the failing fulfiller.
    pub fulfiller: String,
    /// Underlying failure.
    #[source]
    pub source: BoxError,
    /// Cleanup failures suppressed while unwinding completed fulfillers.
    pub cleanup_failures: Vec<CleanupFailure>,
}

/// A suppressed cleanup failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    /// Fulfiller whose cleanup failed.
    pub fulfiller: String,
    /// Error message.
    pub message: String,
}

/// Result of a best-effort cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Fulfillers cleaned up successfully, in cleanup order.
    pub completed: Vec<String>,
    /// Suppressed failures, in cleanup order.
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Returns true when every cleanup call succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Fulfillment pipeline for one level.
pub struct FulfillmentPipeline {
    /// Level this pipeline fulfills.
    level: FulfillmentLevel,
    /// Registrations for the level in fulfillment order.
    registrations: Vec<FulfillerRegistration>,
    /// Event sink for fulfillment events.
    events: Arc<dyn RunEventSink>,
}

impl FulfillmentPipeline {
    /// Builds the pipeline for `level`, ordering its fulfillers once.
    #[must_use]
    pub fn new(
        registry: &FulfillerRegistry,
        level: FulfillmentLevel,
        events: Arc<dyn RunEventSink>,
    ) -> Self {
        Self {
            level,
            registrations: registry.for_level(level),
            events,
        }
    }

    /// Returns the level this pipeline fulfills.
    #[must_use]
    pub const fn level(&self) -> FulfillmentLevel {
        self.level
    }

    /// Returns the fulfiller names in fulfillment order.
    #[must_use]
    pub fn fulfiller_names(&self) -> Vec<&str> {
        self.registrations.iter().map(FulfillerRegistration::name).collect()
    }

    /// Deduplicates `requirements`, runs every fulfiller in priority order and
    /// binds the produced states into `context`.
    ///
    /// # Errors
    ///
    /// Returns [`FulfillmentError`] when a fulfiller fails or panics. The
    /// fulfillers that completed before it have been cleaned up with
    /// [`TestStatus::Failed`] by the time the error is returned.
    pub fn fulfill(
        &self,
        requirements: impl IntoIterator<Item = Requirement>,
        context: &Arc<Context>,
    ) -> Result<FulfilledScope, FulfillmentError> {
        let requirements: RequirementSet = requirements.into_iter().collect();
        let mut scope = FulfilledScope {
            level: self.level,
            context: Arc::clone(context),
            active: Vec::new(),
            states: Vec::new(),
            events: Arc::clone(&self.events),
            finished: false,
        };
        for registration in &self.registrations {
            self.events.record(&RunEvent::FulfillmentStarted {
                timestamp_ms: now_millis(),
                level: self.level,
                fulfiller: registration.name.clone(),
                priority: registration.priority,
            });
            let mut fulfiller = registration.instantiate();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                fulfiller.fulfill(&requirements, context.as_ref())
            }))
            .unwrap_or_else(|payload| {
                Err(format!("fulfiller panicked: {}", panic_message(payload.as_ref())).into())
            });
            match outcome {
                Ok(states) => {
                    for state in &states {
                        context.bind_state(state.clone());
                    }
                    debug!(
                        level = %self.level,
                        fulfiller = %registration.name,
                        states = states.len(),
                        "fulfiller completed"
                    );
                    self.events.record(&RunEvent::FulfillmentCompleted {
                        timestamp_ms: now_millis(),
                        level: self.level,
                        fulfiller: registration.name.clone(),
                        states: states.len(),
                    });
                    scope.states.extend(states);
                    scope.active.push(ActiveFulfiller {
                        name: registration.name.clone(),
                        fulfiller,
                    });
                }
                Err(source) => {
                    warn!(
                        level = %self.level,
                        fulfiller = %registration.name,
                        error = %source,
                        "fulfiller failed; skipping remaining fulfillers"
                    );
                    self.events.record(&RunEvent::FulfillmentFailed {
                        timestamp_ms: now_millis(),
                        level: self.level,
                        fulfiller: registration.name.clone(),
                        error: source.to_string(),
                    });
                    let report = scope.cleanup(TestStatus::Failed);
                    return Err(FulfillmentError {
                        level: self.level,
                        fulfiller: registration.name.clone(),
                        source,
                        cleanup_failures: report.failures,
                    });
                }
            }
        }
        Ok(scope)
    }
}

impl fmt::Debug for FulfillmentPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FulfillmentPipeline")
            .field("level", &self.level)
            .field("registrations", &self.registrations)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Fulfilled Scope
// ============================================================================

/// Fulfiller instance that completed fulfillment.
struct ActiveFulfiller {
    /// Registered fulfiller name.
    name: String,
    /// Live instance awaiting cleanup.
    fulfiller: Box<dyn Fulfiller>,
}

/// Completed fulfillment awaiting cleanup.
pub struct FulfilledScope {
    /// Level that was fulfilled.
    level: FulfillmentLevel,
    /// Context the states were bound into.
    context: Arc<Context>,
    /// Completed fulfillers in fulfillment order.
    active: Vec<ActiveFulfiller>,
    /// States bound by the completed fulfillers.
    states: Vec<BoundState>,
    /// Event sink for cleanup events.
    events: Arc<dyn RunEventSink>,
    /// Set once cleanup has run.
    finished: bool,
}

impl FulfilledScope {
    /// Returns the fulfilled level.
    #[must_use]
    pub const fn level(&self) -> FulfillmentLevel {
        self.level
    }

    /// Returns the states bound by this scope.
    #[must_use]
    pub fn states(&self) -> &[BoundState] {
        &self.states
    }

    /// Returns the completed fulfiller names in fulfillment order.
    #[must_use]
    pub fn fulfilled(&self) -> Vec<&str> {
        self.active.iter().map(|active| active.name.as_str()).collect()
    }

    /// Cleans up every completed fulfiller in reverse order.
    pub fn cleanup(mut self, status: TestStatus) -> CleanupReport {
        self.run_cleanup(status)
    }

    /// Runs cleanup once; later calls are no-ops.
    fn run_cleanup(&mut self, status: TestStatus) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.finished {
            return report;
        }
        self.finished = true;
        while let Some(mut active) = self.active.pop() {
            let context = self.context.as_ref();
            let outcome =
                catch_unwind(AssertUnwindSafe(|| active.fulfiller.cleanup(status, context)))
                    .unwrap_or_else(|payload| {
                        Err(format!("cleanup panicked: {}", panic_message(payload.as_ref()))
                            .into())
                    });
            match outcome {
                Ok(()) => {
                    self.events.record(&RunEvent::CleanupCompleted {
                        timestamp_ms: now_millis(),
                        level: self.level,
                        fulfiller: active.name.clone(),
                        status,
                    });
                    report.completed.push(active.name);
                }
                Err(err) => {
                    warn!(
                        level = %self.level,
                        fulfiller = %active.name,
                        status = %status,
                        error = %err,
                        "suppressed cleanup failure"
                    );
                    self.events.record(&RunEvent::CleanupFailed {
                        timestamp_ms: now_millis(),
                        level: self.level,
                        fulfiller: active.name.clone(),
                        status,
                        error: err.to_string(),
                    });
                    report.failures.push(CleanupFailure {
                        fulfiller: active.name,
                        message: err.to_string(),
                    });
                }
            }
        }
        for state in self.states.drain(..) {
            self.context.unbind(state.key());
        }
        report
    }
}

impl Drop for FulfilledScope {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.run_cleanup(TestStatus::Failed);
        }
    }
}

impl fmt::Debug for FulfilledScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FulfilledScope")
            .field("level", &self.level)
            .field("fulfilled", &self.fulfilled())
            .field("states", &self.states)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
