// crates/testbed-runner/src/runner.rs
// ============================================================================
// Module: Suite Runner
// Description: Runs discovered tests under suite and test fulfillment.
// Purpose: Bracket a batch of tests with scoped setup, teardown, and workers.
// Dependencies: testbed-core, testbed-discovery, tracing
// ============================================================================

//! ## Overview
//! [`SuiteRunner::run`] pushes a suite context, fulfills the union of every
//! test's requirements at suite level exactly once, then runs the tests on
//! parallel workers. Each test runs in its own child context bracketed by
//! test-level fulfillment and cleanup. Suite cleanup runs once after every
//! worker has joined.
//!
//! Invariants:
//! - Outcomes are reported in the order tests were given, not completion
//!   order.
//! - Every test gets a terminal status, even when its worker dies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use testbed_core::CleanupFailure;
use testbed_core::Context;
use testbed_core::ContextError;
use testbed_core::ContextStack;
use testbed_core::FulfillerRegistry;
use testbed_core::FulfillmentLevel;
use testbed_core::FulfillmentPipeline;
use testbed_core::NoopEventSink;
use testbed_core::RequirementSet;
use testbed_core::RunEvent;
use testbed_core::RunEventSink;
use testbed_core::TestStatus;
use testbed_core::now_millis;
use testbed_core::panic_message;
use testbed_core::run_parallel;
use testbed_discovery::ConventionBasedTest;
use tracing::info;
use tracing::warn;

use crate::RunnerError;
use crate::executor::ExecutionOutcome;
use crate::executor::TestExecutor;
use crate::report::RunReport;
use crate::report::TestOutcome;

// ============================================================================
// SECTION: Context State
// ============================================================================

/// Identity of the test running in a context; bound before test fulfillment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentTest {
    /// Fully qualified test name.
    pub name: String,
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Runs a batch of tests as one suite.
pub struct SuiteRunner {
    /// Registered fulfillers for both levels.
    registry: FulfillerRegistry,
    /// Test body executor.
    executor: Arc<dyn TestExecutor>,
    /// Maximum number of concurrent workers.
    threads: usize,
    /// Event sink for fulfillment and test events.
    events: Arc<dyn RunEventSink>,
}

impl SuiteRunner {
    /// Creates a single-threaded runner.
    #[must_use]
    pub fn new(registry: FulfillerRegistry, executor: Arc<dyn TestExecutor>) -> Self {
        Self {
            registry,
            executor,
            threads: 1,
            events: Arc::new(NoopEventSink),
        }
    }

    /// Sets the worker count; zero is treated as one.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn RunEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Runs `tests` under a fresh root context.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] when the context stack is misused.
    pub fn run(&self, tests: &[ConventionBasedTest]) -> Result<RunReport, RunnerError> {
        let mut stack = ContextStack::with_root(Context::root());
        self.run_in(&mut stack, tests)
    }

    /// Runs `tests` in a suite context pushed on `stack`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Context`] when `stack` has no current context.
    pub fn run_in(
        &self,
        stack: &mut ContextStack,
        tests: &[ConventionBasedTest],
    ) -> Result<RunReport, RunnerError> {
        let started_at_ms = now_millis();
        let (outcomes, suite_cleanup_failures) =
            stack.run_with_child_context(|suite| self.run_suite(suite, tests))??;
        let report = RunReport::new(started_at_ms, now_millis(), outcomes, suite_cleanup_failures);
        info!(
            passed = report.passed,
            failed = report.failed,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "suite finished"
        );
        Ok(report)
    }

    /// Runs the suite inside the already pushed suite context.
    fn run_suite(
        &self,
        stack: &mut ContextStack,
        tests: &[ConventionBasedTest],
    ) -> Result<(Vec<TestOutcome>, Vec<CleanupFailure>), RunnerError> {
        let suite_context = Arc::clone(stack.current()?);
        let requirements: RequirementSet =
            tests.iter().flat_map(|test| test.requirements().iter().cloned()).collect();
        let suite_pipeline = FulfillmentPipeline::new(
            &self.registry,
            FulfillmentLevel::Suite,
            Arc::clone(&self.events),
        );
        let suite_scope = match suite_pipeline.fulfill(requirements, &suite_context) {
            Ok(scope) => scope,
            Err(err) => {
                warn!(error = %err, "suite fulfillment failed");
                let message = format!("suite setup failed: {err}");
                let outcomes: Vec<TestOutcome> = tests
                    .iter()
                    .map(|test| {
                        self.record_finished(test.name(), TestStatus::Failed, 0);
                        TestOutcome::not_run(test.name(), message.clone())
                    })
                    .collect();
                return Ok((outcomes, err.cleanup_failures));
            }
        };

        let outcomes = self.run_tests(&suite_context, tests);
        let any_failed = outcomes.iter().any(|outcome| outcome.status.is_failure());
        let status = if any_failed { TestStatus::Failed } else { TestStatus::Passed };
        let cleanup = suite_scope.cleanup(status);
        Ok((outcomes, cleanup.failures))
    }

    /// Runs every test on parallel workers pulling from a shared cursor.
    fn run_tests(
        &self,
        suite_context: &Arc<Context>,
        tests: &[ConventionBasedTest],
    ) -> Vec<TestOutcome> {
        let pipeline = FulfillmentPipeline::new(
            &self.registry,
            FulfillmentLevel::Test,
            Arc::clone(&self.events),
        );
        let slots: Vec<Mutex<Option<TestOutcome>>> =
            tests.iter().map(|_| Mutex::new(None)).collect();
        let cursor = AtomicUsize::new(0);
        let workers = self.threads.min(tests.len());

        let joined = run_parallel(suite_context, workers, |_worker, stack| {
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let (Some(test), Some(slot)) = (tests.get(index), slots.get(index)) else {
                    return Ok::<(), ContextError>(());
                };
                let outcome = stack
                    .run_with_child_context(|scoped| self.run_test(scoped, test, &pipeline))??;
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
            }
        });
        let worker_failure = joined.err().map(|err| err.to_string());
        if let Some(message) = &worker_failure {
            warn!(error = %message, "test workers failed");
        }

        tests
            .iter()
            .zip(slots)
            .map(|(test, slot)| {
                slot.into_inner().unwrap_or_else(PoisonError::into_inner).unwrap_or_else(|| {
                    let cause = worker_failure.as_deref().unwrap_or("worker exited early");
                    self.record_finished(test.name(), TestStatus::Failed, 0);
                    TestOutcome::not_run(test.name(), format!("test did not run: {cause}"))
                })
            })
            .collect()
    }

    /// Runs one test inside the child context on top of `stack`.
    fn run_test(
        &self,
        stack: &mut ContextStack,
        test: &ConventionBasedTest,
        pipeline: &FulfillmentPipeline,
    ) -> Result<TestOutcome, ContextError> {
        let context = Arc::clone(stack.current()?);
        let started = now_millis();
        context.bind(CurrentTest {
            name: test.name().to_string(),
        });

        let (status, message, cleanup_failures) =
            match pipeline.fulfill(test.requirements().iter().cloned(), &context) {
                Err(err) => {
                    let message = format!("test setup failed: {err}");
                    (TestStatus::Failed, Some(message), err.cleanup_failures)
                }
                Ok(scope) => {
                    let executed = catch_unwind(AssertUnwindSafe(|| {
                        self.executor.execute(test, &context)
                    }))
                    .unwrap_or_else(|payload| {
                        ExecutionOutcome::Failed(format!(
                            "test panicked: {}",
                            panic_message(payload.as_ref())
                        ))
                    });
                    let (status, message) = match executed {
                        ExecutionOutcome::Passed => (TestStatus::Passed, None),
                        ExecutionOutcome::Skipped(reason) => (TestStatus::Skipped, Some(reason)),
                        ExecutionOutcome::Failed(message) => (TestStatus::Failed, Some(message)),
                    };
                    let cleanup = scope.cleanup(status);
                    (status, message, cleanup.failures)
                }
            };

        let duration_ms = now_millis().saturating_sub(started);
        self.record_finished(test.name(), status, duration_ms);
        Ok(TestOutcome {
            name: test.name().to_string(),
            status,
            duration_ms,
            message,
            cleanup_failures,
        })
    }

    /// Logs and records a terminal test status.
    fn record_finished(&self, test: &str, status: TestStatus, duration_ms: u128) {
        info!(test, status = %status, duration_ms, "test finished");
        self.events.record(&RunEvent::TestFinished {
            timestamp_ms: now_millis(),
            test: test.to_string(),
            status,
            duration_ms,
        });
    }
}
