// crates/testbed-config/src/config.rs
// ============================================================================
// Module: Testbed Configuration
// Description: Configuration loading and validation for Testbed runs.
// Purpose: Provide strict, fail-closed parsing of `testbed.toml`.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration is read from a TOML file resolved from an explicit path, the
//! `TESTBED_CONFIG` environment variable, or `./testbed.toml`. Only the
//! default file may be absent, in which case defaults apply. Environment
//! overrides are applied after parsing and before validation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::env::EnvOverrides;
use crate::env::TestbedEnv;
use crate::env::read_env_nonempty;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "testbed.toml";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum number of worker threads for a run.
pub(crate) const MAX_THREADS: usize = 256;
/// Default exit code a test command uses to report a skip.
const DEFAULT_SKIP_EXIT_CODE: i32 = 77;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Top-level `testbed.toml` model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestbedConfig {
    /// Discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Run settings.
    #[serde(default)]
    pub run: RunConfig,
    /// Test executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Table provisioning settings.
    #[serde(default)]
    pub tables: TablesConfig,
    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl TestbedConfig {
    /// Loads configuration using the default resolution rules and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading, overrides, or validation fail.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let overrides = EnvOverrides::load().map_err(ConfigError::Invalid)?;
        let explicit = match path {
            Some(path) => Some(path.to_path_buf()),
            None => read_env_nonempty(TestbedEnv::Config.as_str())
                .map_err(ConfigError::Invalid)?
                .map(PathBuf::from),
        };
        Self::load_with(explicit.as_deref(), &overrides)
    }

    /// Loads configuration from `path` (or the default file) and applies
    /// `overrides`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an explicit file is missing or when
    /// parsing, overrides, or validation fail.
    pub fn load_with(path: Option<&Path>, overrides: &EnvOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_NAME);
                if default.exists() { Self::read_file(default)? } else { Self::default() }
            }
        };
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration text without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not a valid config.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Reads and parses one configuration file.
    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::from_toml_str(content)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Applies environment overrides on top of file values.
    pub fn apply_overrides(&mut self, overrides: &EnvOverrides) {
        if let Some(threads) = overrides.threads {
            self.run.threads = threads;
        }
        if let Some(report_dir) = &overrides.report_dir {
            self.run.report_dir = Some(report_dir.clone());
        }
        if let Some(preserve) = overrides.preserve_on_failure {
            self.run.preserve_on_failure = preserve;
        }
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.discovery.validate()?;
        self.run.validate()?;
        self.executor.validate()?;
        self.tables.validate()
    }
}

// ============================================================================
// SECTION: Discovery Section
// ============================================================================

/// `[discovery]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Root directory of the test tree.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Extension of leaf test files.
    #[serde(default = "default_test_extension")]
    pub test_extension: String,
    /// Extension of companion result files.
    #[serde(default = "default_result_extension")]
    pub result_extension: String,
    /// Extension of generator scripts.
    #[serde(default = "default_generator_extension")]
    pub generator_extension: String,
    /// Root name prefix; defaults to the root directory name.
    #[serde(default)]
    pub name_prefix: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            test_extension: default_test_extension(),
            result_extension: default_result_extension(),
            generator_extension: default_generator_extension(),
            name_prefix: None,
        }
    }
}

impl DiscoveryConfig {
    /// Validates extensions and the name prefix.
    fn validate(&self) -> Result<(), ConfigError> {
        let extensions = [
            ("discovery.test_extension", &self.test_extension),
            ("discovery.result_extension", &self.result_extension),
            ("discovery.generator_extension", &self.generator_extension),
        ];
        for (field, value) in extensions {
            if value.is_empty() || value.contains('.') || value.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be a non-empty extension without dots or slashes"
                )));
            }
        }
        if self.test_extension == self.result_extension
            || self.test_extension == self.generator_extension
            || self.result_extension == self.generator_extension
        {
            return Err(ConfigError::Invalid("discovery extensions must be distinct".to_string()));
        }
        if let Some(prefix) = &self.name_prefix
            && (prefix.is_empty()
                || prefix.starts_with('.')
                || prefix.ends_with('.')
                || prefix.contains(".."))
        {
            return Err(ConfigError::Invalid(
                "discovery.name_prefix must be a non-empty dotted name".to_string(),
            ));
        }
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("discovery.root must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Default discovery root.
fn default_root() -> PathBuf {
    PathBuf::from("tests")
}

/// Default leaf test extension.
fn default_test_extension() -> String {
    "sql".to_string()
}

/// Default result file extension.
fn default_result_extension() -> String {
    "result".to_string()
}

/// Default generator script extension.
fn default_generator_extension() -> String {
    "generator".to_string()
}

// ============================================================================
// SECTION: Run Section
// ============================================================================

/// `[run]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Number of worker threads.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Directory receiving `summary.json` and `summary.md`.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
    /// Keep per-test resources of failed tests for debugging.
    #[serde(default)]
    pub preserve_on_failure: bool,
    /// JSONL file receiving run events.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Groups to include.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Groups to exclude.
    #[serde(default)]
    pub exclude_groups: Vec<String>,
    /// Test name selectors.
    #[serde(default)]
    pub tests: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            report_dir: None,
            preserve_on_failure: false,
            event_log: None,
            groups: Vec::new(),
            exclude_groups: Vec::new(),
            tests: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Validates thread bounds and filter entries.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(ConfigError::Invalid(format!(
                "run.threads must be between 1 and {MAX_THREADS}"
            )));
        }
        let lists = [
            ("run.groups", &self.groups),
            ("run.exclude_groups", &self.exclude_groups),
            ("run.tests", &self.tests),
        ];
        for (field, values) in lists {
            if values.iter().any(|value| value.trim().is_empty() || value.trim() != value) {
                return Err(ConfigError::Invalid(format!(
                    "{field} entries must be non-empty and trimmed"
                )));
            }
        }
        Ok(())
    }
}

/// Default worker thread count.
const fn default_threads() -> usize {
    1
}

// ============================================================================
// SECTION: Executor Section
// ============================================================================

/// `[executor]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Command argv; the test file path is appended per test.
    #[serde(default)]
    pub command: Vec<String>,
    /// Exit code that reports a skipped test.
    #[serde(default = "default_skip_exit_code")]
    pub skip_exit_code: i32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            skip_exit_code: default_skip_exit_code(),
        }
    }
}

impl ExecutorConfig {
    /// Returns the command argv, which running tests requires.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no command is configured.
    pub fn require_command(&self) -> Result<&[String], ConfigError> {
        if self.command.is_empty() {
            return Err(ConfigError::Invalid(
                "executor.command must be set to run tests".to_string(),
            ));
        }
        Ok(&self.command)
    }

    /// Validates argv entries and the skip code.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.command.first().is_some_and(|program| program.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "executor.command program must not be empty".to_string(),
            ));
        }
        if !(1 ..= 255).contains(&self.skip_exit_code) {
            return Err(ConfigError::Invalid(
                "executor.skip_exit_code must be between 1 and 255".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default skip exit code.
const fn default_skip_exit_code() -> i32 {
    DEFAULT_SKIP_EXIT_CODE
}

// ============================================================================
// SECTION: Tables Section
// ============================================================================

/// `[tables]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TablesConfig {
    /// Directory holding `<table>.*` dataset files.
    #[serde(default)]
    pub datasets_dir: Option<PathBuf>,
    /// Directory receiving provisioned table copies.
    #[serde(default)]
    pub warehouse_dir: Option<PathBuf>,
}

impl TablesConfig {
    /// Returns `(datasets_dir, warehouse_dir)`, which table requirements need.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when either directory is unset.
    pub fn require_dirs(&self) -> Result<(&Path, &Path), ConfigError> {
        match (&self.datasets_dir, &self.warehouse_dir) {
            (Some(datasets), Some(warehouse)) => Ok((datasets, warehouse)),
            _ => Err(ConfigError::Invalid(
                "tables.datasets_dir and tables.warehouse_dir must be set for table requirements"
                    .to_string(),
            )),
        }
    }

    /// Validates that datasets and warehouse stay apart.
    fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(datasets), Some(warehouse)) = (&self.datasets_dir, &self.warehouse_dir)
            && datasets == warehouse
        {
            return Err(ConfigError::Invalid(
                "tables.datasets_dir and tables.warehouse_dir must differ".to_string(),
            ));
        }
        Ok(())
    }
}
