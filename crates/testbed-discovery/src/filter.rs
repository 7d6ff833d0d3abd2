// crates/testbed-discovery/src/filter.rs
// ============================================================================
// Module: Test Filters
// Description: Group and name based selection of discovered tests.
// Purpose: Narrow a discovery outcome to the tests a run should execute.
// Dependencies: none
// ============================================================================

//! ## Overview
//! A test is selected when it matches a name selector (or none are given),
//! belongs to a requested group (or none are given), and belongs to no
//! excluded group. A name selector matches the test of that exact name and
//! every test nested under it (`suite.joins` selects `suite.joins.inner`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use crate::test::ConventionBasedTest;

// ============================================================================
// SECTION: Filter
// ============================================================================

/// Selection criteria for discovered tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestFilter {
    /// Groups to include; empty includes every group.
    pub groups: BTreeSet<String>,
    /// Groups to exclude.
    pub exclude_groups: BTreeSet<String>,
    /// Dotted name selectors; empty includes every test.
    pub names: Vec<String>,
}

impl TestFilter {
    /// Returns a filter that selects every test.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns true when the filter selects every test.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.exclude_groups.is_empty() && self.names.is_empty()
    }

    /// Returns true when `test` is selected.
    #[must_use]
    pub fn matches(&self, test: &ConventionBasedTest) -> bool {
        let groups = test.groups();
        if groups.iter().any(|group| self.exclude_groups.contains(group)) {
            return false;
        }
        if !self.groups.is_empty() && self.groups.is_disjoint(groups) {
            return false;
        }
        self.names.is_empty()
            || self.names.iter().any(|selector| name_matches(test.name(), selector))
    }

    /// Keeps the selected tests, preserving order.
    #[must_use]
    pub fn apply(&self, tests: Vec<ConventionBasedTest>) -> Vec<ConventionBasedTest> {
        tests.into_iter().filter(|test| self.matches(test)).collect()
    }
}

/// Returns true when `name` equals `selector` or is nested under it.
pub(crate) fn name_matches(name: &str, selector: &str) -> bool {
    name.strip_prefix(selector).is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}
