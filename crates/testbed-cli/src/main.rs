// crates/testbed-cli/src/main.rs
// ============================================================================
// Module: Testbed CLI Entry Point
// Description: Command dispatcher for discovery, runs, and config checks.
// Purpose: Discover convention-based tests and run them with fulfillment.
// Dependencies: clap, serde_json, testbed-config, testbed-discovery, testbed-runner,
//               tracing-subscriber
// ============================================================================

//! ## Overview
//! `testbed` loads `testbed.toml`, discovers the test tree, and either lists
//! the selected tests or runs them through the suite runner. Exit codes:
//! `0` when everything passed, `1` when a test failed, `2` for discovery
//! errors and command failures.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use testbed_config::TestbedConfig;
use testbed_config::TestbedEnv;
use testbed_core::JsonlEventSink;
use testbed_core::NoopEventSink;
use testbed_core::Requirement;
use testbed_core::RunEventSink;
use testbed_discovery::ConventionBasedTest;
use testbed_discovery::DiscoveryConventions;
use testbed_discovery::DiscoveryEngine;
use testbed_discovery::DiscoveryError;
use testbed_discovery::TestFilter;
use testbed_discovery::TestSummary;
use testbed_runner::CommandExecutor;
use testbed_runner::DirectoryTableManager;
use testbed_runner::RunReport;
use testbed_runner::SuiteRunner;
use testbed_runner::TableManager;
use testbed_runner::standard_registry;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Log filter used when `TESTBED_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "warn";
/// Exit code reported when at least one test failed.
const EXIT_TEST_FAILURES: u8 = 1;
/// Exit code reported for discovery errors and command failures.
const EXIT_ERRORS: u8 = 2;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "testbed", version, disable_help_subcommand = true)]
struct Cli {
    /// Configuration file (overrides `TESTBED_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover and print the selected tests.
    List(ListCommand),
    /// Discover and run the selected tests.
    Run(RunCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the configuration.
    Validate,
}

/// Test selection flags shared by `list` and `run`.
#[derive(Args, Debug, Default)]
struct SelectionArgs {
    /// Discovery root (overrides `discovery.root`).
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
    /// Only select tests in this group; repeatable.
    #[arg(long = "group", value_name = "GROUP")]
    groups: Vec<String>,
    /// Skip tests in this group; repeatable.
    #[arg(long = "exclude-group", value_name = "GROUP")]
    exclude_groups: Vec<String>,
    /// Only select this test or the tests nested under it; repeatable.
    #[arg(long = "test", value_name = "NAME")]
    tests: Vec<String>,
}

/// Output formats for `list`.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ListFormat {
    /// One test name per line.
    #[default]
    Text,
    /// Pretty JSON array of test summaries.
    Json,
}

/// Arguments for `list`.
#[derive(Args, Debug)]
struct ListCommand {
    /// Test selection.
    #[command(flatten)]
    selection: SelectionArgs,
    /// Output format.
    #[arg(long, value_enum, default_value_t = ListFormat::Text)]
    format: ListFormat,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
struct RunCommand {
    /// Test selection.
    #[command(flatten)]
    selection: SelectionArgs,
    /// Worker threads (overrides `run.threads`).
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
    /// Report directory (overrides `run.report_dir`).
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a rendered message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Verdict
// ============================================================================

/// Overall result of a `list` or `run` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// Nothing went wrong.
    Clean,
    /// At least one test failed.
    TestFailures,
    /// Discovery reported errors.
    DiscoveryErrors,
}

impl Verdict {
    /// Combines discovery and test results; discovery errors take precedence.
    const fn from_results(discovery_errors: usize, failed_tests: usize) -> Self {
        if discovery_errors > 0 {
            Self::DiscoveryErrors
        } else if failed_tests > 0 {
            Self::TestFailures
        } else {
            Self::Clean
        }
    }

    /// Maps the verdict to a process exit code.
    fn exit_code(self) -> ExitCode {
        match self {
            Self::Clean => ExitCode::SUCCESS,
            Self::TestFailures => ExitCode::from(EXIT_TEST_FAILURES),
            Self::DiscoveryErrors => ExitCode::from(EXIT_ERRORS),
        }
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Installs the stderr log subscriber filtered by `TESTBED_LOG`.
fn init_logging() {
    let filter = EnvFilter::try_from_env(TestbedEnv::Log.as_str())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::List(command) => command_list(cli.config, &command),
        Commands::Run(command) => command_run(cli.config, &command),
        Commands::Config {
            command: ConfigCommand::Validate,
        } => command_config_validate(cli.config),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `list`.
fn command_list(config_path: Option<PathBuf>, command: &ListCommand) -> CliResult<ExitCode> {
    let config = load_config(config_path, &command.selection, |_| {})?;
    let (tests, errors) = discover(&config, Arc::new(NoopEventSink))?;
    let tests = selection_filter(&config, &command.selection).apply(tests);
    match command.format {
        ListFormat::Text => {
            for test in &tests {
                write_stdout_line(test.name())?;
            }
        }
        ListFormat::Json => {
            let summaries: Vec<TestSummary> =
                tests.iter().map(ConventionBasedTest::summary).collect();
            let rendered = serde_json::to_string_pretty(&summaries)
                .map_err(|err| CliError::new(format!("failed to render tests: {err}")))?;
            write_stdout_line(&rendered)?;
        }
    }
    report_discovery_errors(&errors)?;
    Ok(Verdict::from_results(errors.len(), 0).exit_code())
}

/// Executes `run`.
fn command_run(config_path: Option<PathBuf>, command: &RunCommand) -> CliResult<ExitCode> {
    let config = load_config(config_path, &command.selection, |config| {
        if let Some(threads) = command.threads {
            config.run.threads = threads;
        }
        if let Some(report_dir) = &command.report_dir {
            config.run.report_dir = Some(report_dir.clone());
        }
    })?;
    let events = event_sink(&config)?;
    let (tests, errors) = discover(&config, Arc::clone(&events))?;
    let tests = selection_filter(&config, &command.selection).apply(tests);
    debug!(selected = tests.len(), discovery_errors = errors.len(), "tests selected");

    let argv = config.executor.require_command().map_err(|err| CliError::new(err.to_string()))?;
    let executor = CommandExecutor::new(argv.to_vec(), config.executor.skip_exit_code)
        .map_err(|err| CliError::new(err.to_string()))?;
    let tables = table_manager(&config, &tests)?;
    let registry = standard_registry(tables, config.run.preserve_on_failure);
    let report = SuiteRunner::new(registry, Arc::new(executor))
        .with_threads(config.run.threads)
        .with_events(events)
        .run(&tests)
        .map_err(|err| CliError::new(format!("run failed: {err}")))?;

    print_report(&report)?;
    if let Some(dir) = &config.run.report_dir {
        let (json_path, _) = report
            .write(dir)
            .map_err(|err| CliError::new(format!("failed to write report: {err}")))?;
        write_stderr_line(&format!("report written to {}", json_path.display()))?;
    }
    report_discovery_errors(&errors)?;
    Ok(Verdict::from_results(errors.len(), report.failed).exit_code())
}

/// Executes `config validate`.
fn command_config_validate(config_path: Option<PathBuf>) -> CliResult<ExitCode> {
    let config = load_config(config_path, &SelectionArgs::default(), |_| {})?;
    let source = config
        .source
        .as_ref()
        .map_or_else(|| "defaults".to_string(), |path| path.display().to_string());
    write_stdout_line(&format!("config ok: {source}"))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads the configuration, applies command-line overrides, and revalidates.
fn load_config(
    path: Option<PathBuf>,
    selection: &SelectionArgs,
    overrides: impl FnOnce(&mut TestbedConfig),
) -> CliResult<TestbedConfig> {
    let mut config = TestbedConfig::load(path.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    if let Some(root) = &selection.root {
        config.discovery.root.clone_from(root);
    }
    overrides(&mut config);
    config.validate().map_err(|err| CliError::new(err.to_string()))?;
    Ok(config)
}

/// Opens the configured event log, if any.
fn event_sink(config: &TestbedConfig) -> CliResult<Arc<dyn RunEventSink>> {
    let Some(path) = &config.run.event_log else {
        return Ok(Arc::new(NoopEventSink));
    };
    let sink = JsonlEventSink::new(path).map_err(|err| {
        CliError::new(format!("failed to open event log {}: {err}", path.display()))
    })?;
    Ok(Arc::new(sink))
}

/// Discovers the configured tree, keeping discovery errors alongside tests.
fn discover(
    config: &TestbedConfig,
    events: Arc<dyn RunEventSink>,
) -> CliResult<(Vec<ConventionBasedTest>, Vec<DiscoveryError>)> {
    let conventions = DiscoveryConventions {
        test_extension: config.discovery.test_extension.clone(),
        result_extension: config.discovery.result_extension.clone(),
        generator_extension: config.discovery.generator_extension.clone(),
        name_prefix: config.discovery.name_prefix.clone(),
    };
    let engine = DiscoveryEngine::with_conventions(&conventions, events);
    let outcome = engine
        .discover(&config.discovery.root)
        .map_err(|err| CliError::new(format!("discovery failed: {err}")))?;
    Ok((outcome.tests, outcome.errors))
}

/// Builds the test filter; each non-empty flag list replaces its config list.
fn selection_filter(config: &TestbedConfig, selection: &SelectionArgs) -> TestFilter {
    let pick = |flags: &[String], configured: &[String]| -> Vec<String> {
        if flags.is_empty() { configured.to_vec() } else { flags.to_vec() }
    };
    TestFilter {
        groups: pick(&selection.groups, &config.run.groups).into_iter().collect::<BTreeSet<_>>(),
        exclude_groups: pick(&selection.exclude_groups, &config.run.exclude_groups)
            .into_iter()
            .collect(),
        names: pick(&selection.tests, &config.run.tests),
    }
}

/// Returns true when any test declares a table requirement.
fn needs_tables(tests: &[ConventionBasedTest]) -> bool {
    tests.iter().flat_map(ConventionBasedTest::requirements).any(|requirement| {
        matches!(requirement, Requirement::ImmutableTable(_) | Requirement::MutableTable(_))
    })
}

/// Builds the table manager when the selected tests need one.
fn table_manager(
    config: &TestbedConfig,
    tests: &[ConventionBasedTest],
) -> CliResult<Option<Arc<dyn TableManager>>> {
    if !needs_tables(tests) {
        return Ok(None);
    }
    let (datasets, warehouse) =
        config.tables.require_dirs().map_err(|err| CliError::new(err.to_string()))?;
    Ok(Some(Arc::new(DirectoryTableManager::new(datasets, warehouse))))
}

/// Prints per-test lines and totals.
fn print_report(report: &RunReport) -> CliResult<()> {
    for outcome in &report.tests {
        let mut line = format!("{} {}", outcome.status, outcome.name);
        let first_line = outcome.message.as_deref().and_then(|message| message.lines().next());
        if let Some(message) = first_line {
            line.push_str(": ");
            line.push_str(message);
        }
        write_stdout_line(&line)?;
    }
    write_stdout_line(&format!(
        "passed: {}, failed: {}, skipped: {} ({} ms)",
        report.passed, report.failed, report.skipped, report.duration_ms
    ))
}

/// Prints discovery errors to stderr.
fn report_discovery_errors(errors: &[DiscoveryError]) -> CliResult<()> {
    for error in errors {
        write_stderr_line(&format!("discovery error: {error}"))?;
    }
    Ok(())
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write to stdout: {err}")))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> CliResult<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
        .map_err(|err| CliError::new(format!("failed to write to stderr: {err}")))
}

/// Emits an error message and returns the error exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::from(EXIT_ERRORS)
}
