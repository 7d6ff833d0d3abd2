// crates/testbed-core/tests/events.rs
// ============================================================================
// Module: Run Event Log Tests
// Description: Integration tests for the JSON lines event sink.
// Purpose: Validate one tagged JSON object per line and append-only writes.
// Dependencies: testbed-core, serde_json, tempfile
// ============================================================================
//! ## Overview
//! Drives a fulfillment pipeline into a [`JsonlEventSink`] and reads the log
//! back line by line.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use testbed_core::BoundState;
use testbed_core::BoxError;
use testbed_core::Context;
use testbed_core::Fulfiller;
use testbed_core::FulfillerRegistration;
use testbed_core::FulfillerRegistry;
use testbed_core::FulfillmentLevel;
use testbed_core::FulfillmentPipeline;
use testbed_core::JsonlEventSink;
use testbed_core::RequirementSet;
use testbed_core::RunEvent;
use testbed_core::RunEventSink;
use testbed_core::TestStatus;
use testbed_core::now_millis;

/// Fulfiller whose cleanup always fails.
struct LeakyFulfiller;

impl Fulfiller for LeakyFulfiller {
    fn fulfill(
        &mut self,
        _requirements: &RequirementSet,
        _context: &Context,
    ) -> Result<Vec<BoundState>, BoxError> {
        Ok(Vec::new())
    }

    fn cleanup(&mut self, _status: TestStatus, _context: &Context) -> Result<(), BoxError> {
        Err("warehouse unreachable".into())
    }
}

fn read_lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn labels(lines: &[Value]) -> Vec<&str> {
    lines.iter().map(|line| line["event"].as_str().unwrap()).collect()
}

/// Verifies each event becomes one tagged JSON line with a timestamp.
#[test]
fn events_are_written_as_tagged_json_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    let sink: Arc<dyn RunEventSink> = Arc::new(JsonlEventSink::new(&path).unwrap());
    let registry = FulfillerRegistry::new().with(FulfillerRegistration::new(
        "leaky",
        FulfillmentLevel::Test,
        || LeakyFulfiller,
    ));
    let pipeline = FulfillmentPipeline::new(&registry, FulfillmentLevel::Test, Arc::clone(&sink));

    let scope = pipeline.fulfill(Vec::new(), &Context::root()).unwrap();
    let report = scope.cleanup(TestStatus::Passed);
    sink.record(&RunEvent::TestFinished {
        timestamp_ms: now_millis(),
        test: "suite.q1".to_string(),
        status: TestStatus::Failed,
        duration_ms: 12,
    });

    assert_eq!(report.failures.len(), 1);
    let lines = read_lines(&path);
    assert_eq!(labels(&lines), vec![
        "fulfillment_started",
        "fulfillment_completed",
        "cleanup_failed",
        "test_finished"
    ]);
    assert!(lines.iter().all(|line| line["timestamp_ms"].is_u64()));
    let cleanup = &lines[2];
    assert_eq!(cleanup["fulfiller"], "leaky");
    assert_eq!(cleanup["level"], "test");
    assert_eq!(cleanup["status"], "passed");
    assert!(cleanup["error"].as_str().unwrap().contains("warehouse unreachable"));
    let finished = &lines[3];
    assert_eq!(finished["test"], "suite.q1");
    assert_eq!(finished["status"], "failed");
    assert_eq!(finished["duration_ms"], 12);
}

/// Verifies reopening the log appends instead of truncating.
#[test]
fn reopened_log_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    let discovery_failed = |path: &str| RunEvent::DiscoveryFailed {
        timestamp_ms: now_millis(),
        path: path.to_string(),
        error: "no path handler".to_string(),
    };

    JsonlEventSink::new(&path).unwrap().record(&discovery_failed("first"));
    JsonlEventSink::new(&path).unwrap().record(&discovery_failed("second"));

    let lines = read_lines(&path);
    assert_eq!(labels(&lines), vec!["discovery_failed", "discovery_failed"]);
    assert_eq!(lines[0]["path"], "first");
    assert_eq!(lines[1]["path"], "second");
}
