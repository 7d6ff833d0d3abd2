// crates/testbed-discovery/src/descriptor_tests.rs
// ============================================================================
// Module: Test Descriptor Unit Tests
// Description: Unit coverage for test file header parsing.
// Purpose: Ensure headers map onto groups and requirements deterministically.
// Dependencies: testbed-core
// ============================================================================

//! ## Overview
//! Unit coverage for test file header parsing.
//! Invariants:
//! - The header stops at the first non-comment line.
//! - Repeated keys are rejected.
//! - Lines that are not entirely `key: value` entries are plain comments.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Test-only assertions favor direct unwrap/expect for clarity."
)]

use testbed_core::Requirement;

use super::descriptor::TestDescriptor;

#[test]
fn parses_groups_and_requirements() {
    let text = "-- groups: smoke, joins; tables: nation, region\n\
                -- mutable_tables: orders; scratch: spill; requires: warehouse\n\
                SELECT 1;\n";
    let descriptor = TestDescriptor::parse(text).unwrap();

    assert_eq!(
        descriptor.groups.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["joins", "smoke"]
    );
    let requirements: Vec<Requirement> = descriptor.requirements.into_iter().collect();
    assert_eq!(
        requirements,
        vec![
            Requirement::ImmutableTable("nation".to_string()),
            Requirement::ImmutableTable("region".to_string()),
            Requirement::MutableTable("orders".to_string()),
            Requirement::ScratchDirectory("spill".to_string()),
            Requirement::Named("warehouse".to_string()),
        ]
    );
    assert_eq!(descriptor.body, "SELECT 1;");
}

#[test]
fn header_ends_at_first_body_line() {
    let text = "-- groups: a\nSELECT 1;\n-- groups: b\n";
    let descriptor = TestDescriptor::parse(text).unwrap();
    assert!(descriptor.groups.contains("a"));
    assert!(!descriptor.groups.contains("b"));
    assert_eq!(descriptor.body, "SELECT 1;\n-- groups: b");
}

#[test]
fn plain_comments_and_unknown_keys_are_kept_apart() {
    let text = "-- checks the join order\n-- database: hive\nSELECT 2;";
    let descriptor = TestDescriptor::parse(text).unwrap();
    assert!(descriptor.groups.is_empty());
    assert!(descriptor.requirements.is_empty());
    assert_eq!(descriptor.properties.get("database").map(String::as_str), Some("hive"));
}

#[test]
fn repeated_keys_are_rejected() {
    let err = TestDescriptor::parse("-- groups: a\n-- groups: b\n").unwrap_err();
    assert!(err.contains("`groups`"));
}

#[test]
fn prose_with_colons_is_a_plain_comment() {
    let text = "-- Checks: nulls; then joins\n-- groups: smoke\nSELECT 3;";
    let descriptor = TestDescriptor::parse(text).unwrap();
    assert!(descriptor.properties.is_empty());
    assert!(descriptor.groups.contains("smoke"));
    assert_eq!(descriptor.body, "SELECT 3;");
}

#[test]
fn empty_keys_are_rejected() {
    let err = TestDescriptor::parse("-- : smoke\n").unwrap_err();
    assert!(err.contains("empty key"));
}

#[test]
fn empty_items_are_ignored() {
    let descriptor = TestDescriptor::parse("-- tables: , nation,,\n").unwrap();
    assert_eq!(descriptor.requirements.len(), 1);
    assert_eq!(descriptor.body, "");
}
