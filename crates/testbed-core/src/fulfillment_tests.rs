// crates/testbed-core/src/fulfillment_tests.rs
// ============================================================================
// Module: Fulfillment Pipeline Unit Tests
// Description: Unit coverage for fulfiller ordering, failure, and cleanup.
// Purpose: Ensure cleanup mirrors fulfillment and never aborts early.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Unit coverage for fulfiller ordering, failure, and cleanup.
//! Invariants:
//! - Fulfillment runs by ascending priority; cleanup runs in reverse.
//! - A failed fulfiller stops fulfillment but not cleanup of its predecessors.
//! - Cleanup failures are suppressed and recorded.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    reason = "Test-only assertions favor direct unwrap/expect for clarity."
)]

use std::sync::Arc;
use std::sync::Mutex;

use super::BoxError;
use super::context::BoundState;
use super::context::Context;
use super::events::MemoryEventSink;
use super::events::NoopEventSink;
use super::events::RunEvent;
use super::fulfillment::Fulfiller;
use super::fulfillment::FulfillerRegistration;
use super::fulfillment::FulfillerRegistry;
use super::fulfillment::FulfillmentPipeline;
use super::requirements::FulfillmentLevel;
use super::requirements::Requirement;
use super::requirements::RequirementSet;
use super::requirements::TestStatus;

// ============================================================================
// SECTION: Helpers
// ============================================================================

type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Succeed,
    FailFulfill,
    FailCleanup,
    PanicFulfill,
}

struct Recording {
    label: String,
    mode: Mode,
    journal: Journal,
}

#[derive(Debug, PartialEq, Eq)]
struct Provisioned(String);

impl Fulfiller for Recording {
    fn fulfill(
        &mut self,
        requirements: &RequirementSet,
        _context: &Context,
    ) -> Result<Vec<BoundState>, BoxError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("fulfill {} ({} reqs)", self.label, requirements.len()));
        match self.mode {
            Mode::FailFulfill => Err(format!("{} refused", self.label).into()),
            Mode::PanicFulfill => panic!("{} exploded", self.label),
            Mode::Succeed | Mode::FailCleanup => {
                Ok(vec![BoundState::named(self.label.clone(), Provisioned(self.label.clone()))])
            }
        }
    }

    fn cleanup(&mut self, status: TestStatus, _context: &Context) -> Result<(), BoxError> {
        self.journal.lock().unwrap().push(format!("cleanup {} {status}", self.label));
        if self.mode == Mode::FailCleanup {
            return Err(format!("{} cleanup broke", self.label).into());
        }
        Ok(())
    }
}

fn registration(
    label: &str,
    level: FulfillmentLevel,
    priority: i32,
    mode: Mode,
    journal: &Journal,
) -> FulfillerRegistration {
    let label = label.to_string();
    let journal = Arc::clone(journal);
    FulfillerRegistration::new(label.clone(), level, move || Recording {
        label: label.clone(),
        mode,
        journal: Arc::clone(&journal),
    })
    .with_priority(priority)
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn fulfills_by_ascending_priority_and_cleans_up_in_reverse() {
    let journal = Journal::default();
    let registry = FulfillerRegistry::new()
        .with(registration("p3", FulfillmentLevel::Test, 3, Mode::Succeed, &journal))
        .with(registration("p1", FulfillmentLevel::Test, 1, Mode::Succeed, &journal))
        .with(registration("p2", FulfillmentLevel::Test, 2, Mode::Succeed, &journal));
    let pipeline =
        FulfillmentPipeline::new(&registry, FulfillmentLevel::Test, Arc::new(NoopEventSink));
    assert_eq!(pipeline.fulfiller_names(), vec!["p1", "p2", "p3"]);

    let context = Context::root();
    let scope = pipeline.fulfill(Vec::new(), &context).unwrap();
    let report = scope.cleanup(TestStatus::Passed);

    assert!(report.is_clean());
    assert_eq!(report.completed, vec!["p3", "p2", "p1"]);
    assert_eq!(
        entries(&journal),
        vec![
            "fulfill p1 (0 reqs)",
            "fulfill p2 (0 reqs)",
            "fulfill p3 (0 reqs)",
            "cleanup p3 passed",
            "cleanup p2 passed",
            "cleanup p1 passed",
        ]
    );
}

#[test]
fn equal_priorities_keep_registration_order() {
    let journal = Journal::default();
    let registry = FulfillerRegistry::new()
        .with(registration("first", FulfillmentLevel::Suite, 0, Mode::Succeed, &journal))
        .with(registration("second", FulfillmentLevel::Suite, 0, Mode::Succeed, &journal))
        .with(registration("early", FulfillmentLevel::Suite, -1, Mode::Succeed, &journal));
    let pipeline =
        FulfillmentPipeline::new(&registry, FulfillmentLevel::Suite, Arc::new(NoopEventSink));
    assert_eq!(pipeline.fulfiller_names(), vec!["early", "first", "second"]);
}

#[test]
fn failure_skips_later_fulfillers_and_cleans_up_earlier_ones() {
    let journal = Journal::default();
    let registry = FulfillerRegistry::new()
        .with(registration("p3", FulfillmentLevel::Test, 3, Mode::Succeed, &journal))
        .with(registration("p1", FulfillmentLevel::Test, 1, Mode::Succeed, &journal))
        .with(registration("p2", FulfillmentLevel::Test, 2, Mode::FailFulfill, &journal));
    let pipeline =
        FulfillmentPipeline::new(&registry, FulfillmentLevel::Test, Arc::new(NoopEventSink));

    let context = Context::root();
    let err = pipeline.fulfill(Vec::new(), &context).unwrap_err();

    assert_eq!(err.fulfiller, "p2");
    assert_eq!(err.level, FulfillmentLevel::Test);
    assert!(err.to_string().contains("p2 refused"));
    assert_eq!(
        entries(&journal),
        vec!["fulfill p1 (0 reqs)", "fulfill p2 (0 reqs)", "cleanup p1 failed"]
    );
    assert!(context.get_named::<Provisioned>("p1").is_none());
}

#[test]
fn panicking_fulfiller_is_reported_as_fulfillment_error() {
    let journal = Journal::default();
    let registry = FulfillerRegistry::new()
        .with(registration("ok", FulfillmentLevel::Test, 0, Mode::Succeed, &journal))
        .with(registration("boom", FulfillmentLevel::Test, 1, Mode::PanicFulfill, &journal));
    let pipeline =
        FulfillmentPipeline::new(&registry, FulfillmentLevel::Test, Arc::new(NoopEventSink));

    let err = pipeline.fulfill(Vec::new(), &Context::root()).unwrap_err();

    assert_eq!(err.fulfiller, "boom");
    assert!(err.to_string().contains("boom exploded"));
    assert_eq!(entries(&journal).last().map(String::as_str), Some("cleanup ok failed"));
}

#[test]
fn cleanup_failures_are_suppressed_and_recorded() {
    let journal = Journal::default();
    let events = Arc::new(MemoryEventSink::new());
    let registry = FulfillerRegistry::new()
        .with(registration("a", FulfillmentLevel::Test, 0, Mode::Succeed, &journal))
        .with(registration("b", FulfillmentLevel::Test, 1, Mode::FailCleanup, &journal))
        .with(registration("c", FulfillmentLevel::Test, 2, Mode::Succeed, &journal));
    let pipeline = FulfillmentPipeline::new(&registry, FulfillmentLevel::Test, events.clone());

    let scope = pipeline.fulfill(Vec::new(), &Context::root()).unwrap();
    let report = scope.cleanup(TestStatus::Failed);

    assert_eq!(report.completed, vec!["c", "a"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].fulfiller, "b");
    assert!(report.failures[0].message.contains("b cleanup broke"));
    let failed: Vec<RunEvent> = events
        .events()
        .into_iter()
        .filter(|event| matches!(event, RunEvent::CleanupFailed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        entries(&journal)[3..],
        ["cleanup c failed", "cleanup b failed", "cleanup a failed"]
    );
}

#[test]
fn duplicate_requirements_are_collapsed() {
    let journal = Journal::default();
    let registry = FulfillerRegistry::new().with(registration(
        "tables",
        FulfillmentLevel::Suite,
        0,
        Mode::Succeed,
        &journal,
    ));
    let pipeline =
        FulfillmentPipeline::new(&registry, FulfillmentLevel::Suite, Arc::new(NoopEventSink));
    let requirements = vec![
        Requirement::ImmutableTable("nation".to_string()),
        Requirement::ImmutableTable("nation".to_string()),
        Requirement::ImmutableTable("region".to_string()),
    ];

    let scope = pipeline.fulfill(requirements, &Context::root()).unwrap();
    drop(scope);

    assert_eq!(entries(&journal)[0], "fulfill tables (2 reqs)");
}

#[test]
fn states_are_bound_then_released() {
    let journal = Journal::default();
    let registry = FulfillerRegistry::new().with(registration(
        "warehouse",
        FulfillmentLevel::Test,
        0,
        Mode::Succeed,
        &journal,
    ));
    let pipeline =
        FulfillmentPipeline::new(&registry, FulfillmentLevel::Test, Arc::new(NoopEventSink));
    let context = Context::root();

    let scope = pipeline.fulfill(Vec::new(), &context).unwrap();
    assert_eq!(scope.states().len(), 1);
    assert_eq!(
        context.get_named::<Provisioned>("warehouse").as_deref(),
        Some(&Provisioned("warehouse".to_string()))
    );

    let _ = scope.cleanup(TestStatus::Passed);
    assert!(context.get_named::<Provisioned>("warehouse").is_none());
}

#[test]
fn dropped_scope_cleans_up_as_failed() {
    let journal = Journal::default();
    let registry = FulfillerRegistry::new().with(registration(
        "dangling",
        FulfillmentLevel::Test,
        0,
        Mode::Succeed,
        &journal,
    ));
    let pipeline =
        FulfillmentPipeline::new(&registry, FulfillmentLevel::Test, Arc::new(NoopEventSink));

    let scope = pipeline.fulfill(Vec::new(), &Context::root()).unwrap();
    drop(scope);

    assert_eq!(entries(&journal)[1], "cleanup dangling failed");
}

#[test]
fn pipelines_only_run_their_own_level() {
    let journal = Journal::default();
    let registry = FulfillerRegistry::new()
        .with(registration("suite", FulfillmentLevel::Suite, 0, Mode::Succeed, &journal))
        .with(registration("test", FulfillmentLevel::Test, 0, Mode::Succeed, &journal));
    let pipeline =
        FulfillmentPipeline::new(&registry, FulfillmentLevel::Test, Arc::new(NoopEventSink));

    let scope = pipeline.fulfill(Vec::new(), &Context::root()).unwrap();
    assert_eq!(scope.fulfilled(), vec!["test"]);
    let _ = scope.cleanup(TestStatus::Skipped);

    assert_eq!(entries(&journal), vec!["fulfill test (0 reqs)", "cleanup test skipped"]);
}
