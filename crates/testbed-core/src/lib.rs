// crates/testbed-core/src/lib.rs
// ============================================================================
// Module: Testbed Core Library
// Description: Public API surface for the Testbed orchestration core.
// Purpose: Expose the context stack, fulfillment pipeline, and parallel runner.
// Dependencies: crate::{context, events, fulfillment, parallel, requirements}
// ============================================================================

//! ## Overview
//! Testbed core lets a test author declare what a test needs and leaves the
//! setup and teardown to registered fulfillers. State produced during setup is
//! bound into a hierarchical [`Context`], scoped by an explicit
//! [`ContextStack`], and concurrent sub-steps run through [`run_parallel`]
//! with private child contexts and aggregated failures.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod context;
pub mod events;
pub mod fulfillment;
pub mod parallel;
pub mod requirements;

#[cfg(test)]
mod fulfillment_tests;

// ============================================================================
// SECTION: Shared Types
// ============================================================================

/// Boxed error raised by user-supplied fulfillers and worker bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use context::BoundState;
pub use context::ChildScope;
pub use context::Context;
pub use context::ContextError;
pub use context::ContextStack;
pub use context::StateKey;
pub use events::JsonlEventSink;
pub use events::MemoryEventSink;
pub use events::NoopEventSink;
pub use events::RunEvent;
pub use events::RunEventSink;
pub use events::now_millis;
pub use fulfillment::CleanupFailure;
pub use fulfillment::CleanupReport;
pub use fulfillment::FulfilledScope;
pub use fulfillment::Fulfiller;
pub use fulfillment::FulfillerRegistration;
pub use fulfillment::FulfillerRegistry;
pub use fulfillment::FulfillmentError;
pub use fulfillment::FulfillmentPipeline;
pub use parallel::AggregatedFailure;
pub use parallel::WorkerCause;
pub use parallel::WorkerFailure;
pub use parallel::panic_message;
pub use parallel::run_parallel;
pub use requirements::FulfillmentLevel;
pub use requirements::Requirement;
pub use requirements::RequirementSet;
pub use requirements::TestStatus;
