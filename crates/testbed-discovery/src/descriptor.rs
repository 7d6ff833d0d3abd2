// crates/testbed-discovery/src/descriptor.rs
// ============================================================================
// Module: Test Descriptors
// Description: Header metadata parsed from convention test files.
// Purpose: Turn `-- key: value` header lines into groups and requirements.
// Dependencies: serde, testbed-core
// ============================================================================

//! ## Overview
//! A test file may open with comment header lines such as
//! `-- groups: smoke, joins; tables: nation, region`. The header ends at the
//! first line that is not a `--` comment; everything after it is the body.
//!
//! Recognised keys map to requirements: `tables` to immutable tables,
//! `mutable_tables` to per-test tables, `scratch` to scratch directories and
//! `requires` to named requirements. Other keys are kept as properties.
//! A header line is read as entries only when every `;`-separated part has a
//! `:`; anything else (`-- checks: nulls; then joins`) is an ordinary comment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use testbed_core::Requirement;
use testbed_core::RequirementSet;

use crate::DiscoveryError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Comment marker opening every header line.
const HEADER_MARKER: &str = "--";
/// Header key listing test groups.
const KEY_GROUPS: &str = "groups";
/// Header key listing immutable tables.
const KEY_TABLES: &str = "tables";
/// Header key listing per-test mutable tables.
const KEY_MUTABLE_TABLES: &str = "mutable_tables";
/// Header key listing named requirements.
const KEY_REQUIRES: &str = "requires";
/// Header key listing scratch directories.
const KEY_SCRATCH: &str = "scratch";

// ============================================================================
// SECTION: Descriptor
// ============================================================================

/// Parsed header and body of a convention test file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestDescriptor {
    /// Groups the test belongs to.
    pub groups: BTreeSet<String>,
    /// Requirements declared in the header.
    pub requirements: RequirementSet,
    /// Unrecognised header keys, verbatim.
    pub properties: BTreeMap<String, String>,
    /// Body text following the header.
    #[serde(skip)]
    pub body: String,
}

impl TestDescriptor {
    /// Parses descriptor text.
    ///
    /// # Errors
    ///
    /// Returns a message when a header key is empty or repeats.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut descriptor = Self::default();
        let mut seen = BTreeSet::new();
        let mut lines = text.lines().peekable();
        while let Some(line) = lines.next_if(|line| line.trim_start().starts_with(HEADER_MARKER)) {
            let content = line.trim_start()[HEADER_MARKER.len() ..].trim();
            let Some(entries) = header_entries(content) else {
                continue;
            };
            for (key, value) in entries {
                let key = key.trim();
                if key.is_empty() {
                    return Err(format!("header entry `:{value}` has an empty key"));
                }
                if !seen.insert(key.to_string()) {
                    return Err(format!("header key `{key}` is declared more than once"));
                }
                descriptor.apply(key, value.trim());
            }
        }
        descriptor.body = lines.collect::<Vec<_>>().join("\n");
        Ok(descriptor)
    }

    /// Reads and parses the descriptor of the test file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Io`] when the file cannot be read as UTF-8 and
    /// [`DiscoveryError::Descriptor`] when the header is malformed.
    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        let text = fs::read_to_string(path).map_err(|err| DiscoveryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse(&text).map_err(|message| DiscoveryError::Descriptor {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Records one header entry.
    fn apply(&mut self, key: &str, value: &str) {
        let items = split_list(value);
        match key {
            KEY_GROUPS => self.groups.extend(items),
            KEY_TABLES => {
                self.requirements.extend(items.into_iter().map(Requirement::ImmutableTable));
            }
            KEY_MUTABLE_TABLES => {
                self.requirements.extend(items.into_iter().map(Requirement::MutableTable));
            }
            KEY_REQUIRES => self.requirements.extend(items.into_iter().map(Requirement::Named)),
            KEY_SCRATCH => {
                self.requirements.extend(items.into_iter().map(Requirement::ScratchDirectory));
            }
            _ => {
                self.properties.insert(key.to_string(), value.to_string());
            }
        }
    }
}

/// Splits a header line into `key: value` entries.
///
/// Returns `None` for prose: a line with no entries, or with any
/// `;`-separated entry lacking a `:`.
fn header_entries(content: &str) -> Option<Vec<(&str, &str)>> {
    let entries = content
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.split_once(':'))
        .collect::<Option<Vec<_>>>()?;
    (!entries.is_empty()).then_some(entries)
}

/// Splits a comma-separated header value, dropping empty items.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}
