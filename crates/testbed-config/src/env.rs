// crates/testbed-config/src/env.rs
// ============================================================================
// Module: Testbed Environment
// Description: Environment-backed overrides for Testbed configuration.
// Purpose: Centralize env parsing with strict UTF-8 validation.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Environment values are parsed with strict UTF-8 enforcement to avoid silent
//! misconfiguration. Set-but-empty values and invalid UTF-8 fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

// ============================================================================
// SECTION: Environment Constants
// ============================================================================

/// Environment keys read by Testbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestbedEnv {
    /// Configuration file path.
    Config,
    /// Worker thread override (positive integer).
    Threads,
    /// Report directory override.
    ReportDir,
    /// Preserve failed-test resources (`true`/`false` or `1`/`0`).
    PreserveOnFailure,
    /// Log filter directive for the CLI.
    Log,
}

impl TestbedEnv {
    /// Returns the canonical environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "TESTBED_CONFIG",
            Self::Threads => "TESTBED_THREADS",
            Self::ReportDir => "TESTBED_REPORT_DIR",
            Self::PreserveOnFailure => "TESTBED_PRESERVE_ON_FAILURE",
            Self::Log => "TESTBED_LOG",
        }
    }
}

// ============================================================================
// SECTION: Overrides
// ============================================================================

/// Run overrides taken from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// Worker thread override.
    pub threads: Option<usize>,
    /// Report directory override.
    pub report_dir: Option<PathBuf>,
    /// Preserve-on-failure override.
    pub preserve_on_failure: Option<bool>,
}

impl EnvOverrides {
    /// Loads overrides from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a value is not valid UTF-8, is empty, or does not
    /// parse.
    pub fn load() -> Result<Self, String> {
        let threads = read_env_nonempty(TestbedEnv::Threads.as_str())?
            .map(|value| parse_positive(TestbedEnv::Threads.as_str(), &value))
            .transpose()?;
        let report_dir = read_env_nonempty(TestbedEnv::ReportDir.as_str())?.map(PathBuf::from);
        let preserve_on_failure = read_env_nonempty(TestbedEnv::PreserveOnFailure.as_str())?
            .map(|value| parse_bool(TestbedEnv::PreserveOnFailure.as_str(), &value))
            .transpose()?;
        Ok(Self {
            threads,
            report_dir,
            preserve_on_failure,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads an environment variable and enforces UTF-8 validity.
///
/// # Errors
///
/// Returns an error when the environment variable contains invalid UTF-8.
pub fn read_env_strict(name: &str) -> Result<Option<String>, String> {
    std::env::var_os(name).map_or(Ok(None), |raw| {
        raw.into_string().map(Some).map_err(|_| format!("{name} must be valid UTF-8"))
    })
}

/// Reads an environment variable and rejects empty values.
///
/// # Errors
///
/// Returns an error when the variable is set but empty or whitespace.
pub(crate) fn read_env_nonempty(name: &str) -> Result<Option<String>, String> {
    match read_env_strict(name)? {
        Some(value) if value.trim().is_empty() => Err(format!("{name} must not be empty")),
        Some(value) => Ok(Some(value)),
        None => Ok(None),
    }
}

/// Parses a positive integer.
pub(crate) fn parse_positive(name: &str, raw: &str) -> Result<usize, String> {
    let value: usize =
        raw.trim().parse().map_err(|_| format!("{name} must be a positive integer"))?;
    if value == 0 {
        return Err(format!("{name} must be greater than zero"));
    }
    Ok(value)
}

/// Parses a boolean literal.
pub(crate) fn parse_bool(name: &str, raw: &str) -> Result<bool, String> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
        return Ok(true);
    }
    if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
        return Ok(false);
    }
    Err(format!("{name} must be 1, 0, true, or false"))
}
