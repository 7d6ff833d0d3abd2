//! Config parsing and validation tests for testbed-config.
// crates/testbed-config/tests/config_validation.rs
// =============================================================================
// Module: Config Validation Tests
// Description: Validate defaults, parsing limits, and cross-field rules.
// Purpose: Ensure testbed.toml fails closed on malformed input.
// =============================================================================

use std::fs;
use std::path::PathBuf;

use testbed_config::ConfigError;
use testbed_config::EnvOverrides;
use testbed_config::TestbedConfig;

type TestResult = Result<(), String>;

fn assert_invalid<T>(result: Result<T, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}

fn parse_valid(content: &str) -> Result<TestbedConfig, String> {
    let config = TestbedConfig::from_toml_str(content).map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

#[test]
fn empty_file_uses_defaults() -> TestResult {
    let config = parse_valid("")?;
    if config.discovery.test_extension != "sql"
        || config.discovery.result_extension != "result"
        || config.discovery.generator_extension != "generator"
        || config.run.threads != 1
        || config.executor.skip_exit_code != 77
        || config.discovery.root != PathBuf::from("tests")
    {
        return Err(format!("unexpected defaults: {config:?}"));
    }
    Ok(())
}

#[test]
fn full_file_round_trips_into_model() -> TestResult {
    let config = parse_valid(
        r#"
[discovery]
root = "suite"
name_prefix = "product"

[run]
threads = 4
report_dir = "reports"
preserve_on_failure = true
groups = ["smoke"]
exclude_groups = ["slow"]
tests = ["product.joins"]

[executor]
command = ["sh", "run-query.sh"]
skip_exit_code = 3

[tables]
datasets_dir = "data"
warehouse_dir = "warehouse"
"#,
    )?;
    if config.run.threads != 4
        || !config.run.preserve_on_failure
        || config.executor.command != vec!["sh".to_string(), "run-query.sh".to_string()]
        || config.discovery.name_prefix.as_deref() != Some("product")
    {
        return Err(format!("unexpected config: {config:?}"));
    }
    let (datasets, warehouse) = config.tables.require_dirs().map_err(|err| err.to_string())?;
    if datasets != PathBuf::from("data") || warehouse != PathBuf::from("warehouse") {
        return Err("table dirs not parsed".to_string());
    }
    Ok(())
}

#[test]
fn unknown_fields_are_rejected() -> TestResult {
    assert_invalid(TestbedConfig::from_toml_str("[run]\nthreadz = 2\n"), "threadz")
}

#[test]
fn thread_count_is_bounded() -> TestResult {
    let mut config = parse_valid("")?;
    config.run.threads = 0;
    assert_invalid(config.validate(), "run.threads must be between 1 and 256")?;
    config.run.threads = 257;
    assert_invalid(config.validate(), "run.threads must be between 1 and 256")
}

#[test]
fn extensions_must_be_distinct_and_plain() -> TestResult {
    let mut config = parse_valid("")?;
    config.discovery.result_extension = "sql".to_string();
    assert_invalid(config.validate(), "discovery extensions must be distinct")?;
    config.discovery.result_extension = ".result".to_string();
    assert_invalid(config.validate(), "discovery.result_extension")
}

#[test]
fn name_prefix_must_be_dotted_name() -> TestResult {
    let mut config = parse_valid("")?;
    config.discovery.name_prefix = Some("suite.".to_string());
    assert_invalid(config.validate(), "discovery.name_prefix")
}

#[test]
fn skip_exit_code_is_bounded() -> TestResult {
    let mut config = parse_valid("")?;
    config.executor.skip_exit_code = 0;
    assert_invalid(config.validate(), "executor.skip_exit_code")
}

#[test]
fn command_is_required_only_for_running() -> TestResult {
    let config = parse_valid("")?;
    assert_invalid(config.executor.require_command(), "executor.command must be set")?;
    assert_invalid(config.tables.require_dirs(), "tables.datasets_dir")
}

#[test]
fn explicit_missing_file_is_an_io_error() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let missing = dir.path().join("absent.toml");
    match TestbedConfig::load_with(Some(&missing), &EnvOverrides::default()) {
        Err(ConfigError::Io(_)) => Ok(()),
        other => Err(format!("expected io error, got {other:?}")),
    }
}

#[test]
fn oversized_file_is_rejected() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("testbed.toml");
    let padding = format!("# {}\n", "x".repeat(1024 * 1024));
    fs::write(&path, padding).map_err(|err| err.to_string())?;
    assert_invalid(
        TestbedConfig::load_with(Some(&path), &EnvOverrides::default()),
        "config file exceeds size limit",
    )
}

#[test]
fn overrides_replace_file_values() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("testbed.toml");
    fs::write(&path, "[run]\nthreads = 2\nreport_dir = \"file-reports\"\n")
        .map_err(|err| err.to_string())?;
    let overrides = EnvOverrides {
        threads: Some(6),
        report_dir: Some(PathBuf::from("env-reports")),
        preserve_on_failure: Some(true),
    };
    let config =
        TestbedConfig::load_with(Some(&path), &overrides).map_err(|err| err.to_string())?;
    if config.run.threads != 6
        || config.run.report_dir != Some(PathBuf::from("env-reports"))
        || !config.run.preserve_on_failure
    {
        return Err(format!("overrides not applied: {:?}", config.run));
    }
    Ok(())
}
