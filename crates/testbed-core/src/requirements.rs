// crates/testbed-core/src/requirements.rs
// ============================================================================
// Module: Requirements and Outcomes
// Description: Declarative test preconditions and terminal test statuses.
// Purpose: Provide the value objects exchanged with fulfillers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Requirement`] describes a precondition a test needs before its body
//! runs. Requirements are immutable, totally ordered values so a
//! [`RequirementSet`] deduplicates independent declarations of the same
//! resource and iterates deterministically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Requirement
// ============================================================================

/// Declarative precondition for a test or suite.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Requirement {
    /// A shared, read-only table provisioned once per suite.
    ImmutableTable(String),
    /// A private table provisioned fresh for each test.
    MutableTable(String),
    /// A private scratch directory created for each test.
    ScratchDirectory(String),
    /// A named requirement understood by a custom fulfiller.
    Named(String),
}

impl Requirement {
    /// Returns the resource name carried by the requirement.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ImmutableTable(name)
            | Self::MutableTable(name)
            | Self::ScratchDirectory(name)
            | Self::Named(name) => name,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImmutableTable(name) => write!(f, "immutable table {name}"),
            Self::MutableTable(name) => write!(f, "mutable table {name}"),
            Self::ScratchDirectory(name) => write!(f, "scratch directory {name}"),
            Self::Named(name) => write!(f, "requirement {name}"),
        }
    }
}

/// Deduplicated, ordered set of requirements.
pub type RequirementSet = BTreeSet<Requirement>;

// ============================================================================
// SECTION: Levels and Statuses
// ============================================================================

/// Scope at which a fulfiller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentLevel {
    /// Fulfilled once before the first test; cleaned up after the last.
    Suite,
    /// Fulfilled and cleaned up around every individual test.
    Test,
}

impl FulfillmentLevel {
    /// Returns a stable label for the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Suite => "suite",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for FulfillmentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome handed to cleanup so fulfillers may preserve resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// The test passed.
    Passed,
    /// The test failed, either in setup or in its body.
    Failed,
    /// The test was skipped.
    Skipped,
}

impl TestStatus {
    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Returns true for [`TestStatus::Failed`].
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
