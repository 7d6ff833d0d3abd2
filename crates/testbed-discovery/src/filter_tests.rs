// crates/testbed-discovery/src/filter_tests.rs
// ============================================================================
// Module: Test Filter Unit Tests
// Description: Unit coverage for group and name based test selection.
// Purpose: Ensure exclusion wins and name selectors respect segment bounds.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Unit coverage for group and name based test selection.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Test-only assertions favor direct unwrap/expect for clarity."
)]

use super::descriptor::TestDescriptor;
use super::filter::TestFilter;
use super::filter::name_matches;
use super::test::ConventionBasedTest;

fn test_with_groups(name: &str, groups: &[&str]) -> ConventionBasedTest {
    let header = format!("-- groups: {}\nSELECT 1;", groups.join(", "));
    let descriptor = TestDescriptor::parse(&header).unwrap();
    ConventionBasedTest::new(name, format!("/tmp/{name}.sql"), None, descriptor)
}

#[test]
fn name_selectors_match_whole_segments() {
    assert!(name_matches("suite.joins", "suite.joins"));
    assert!(name_matches("suite.joins.left", "suite.joins"));
    assert!(!name_matches("suite.joinsx", "suite.joins"));
    assert!(!name_matches("suite", "suite.joins"));
}

#[test]
fn empty_filter_selects_everything() {
    let filter = TestFilter::all();
    assert!(filter.is_empty());
    assert!(filter.matches(&test_with_groups("root.a", &[])));
}

#[test]
fn groups_include_and_exclusion_wins() {
    let filter = TestFilter {
        groups: ["smoke".to_string()].into(),
        exclude_groups: ["slow".to_string()].into(),
        names: Vec::new(),
    };
    assert!(filter.matches(&test_with_groups("root.a", &["smoke"])));
    assert!(!filter.matches(&test_with_groups("root.b", &["smoke", "slow"])));
    assert!(!filter.matches(&test_with_groups("root.c", &["other"])));
}

#[test]
fn apply_preserves_discovery_order() {
    let filter = TestFilter {
        names: vec!["root.sub".to_string(), "root.a".to_string()],
        ..TestFilter::default()
    };
    let selected = filter.apply(vec![
        test_with_groups("root.a", &[]),
        test_with_groups("root.b", &[]),
        test_with_groups("root.sub.c", &[]),
    ]);
    let names: Vec<&str> = selected.iter().map(ConventionBasedTest::name).collect();
    assert_eq!(names, vec!["root.a", "root.sub.c"]);
}
