//! SQL Server permissions reconciliation tool.
//!
//! Reads a JSON description of the logins, users, role memberships, and
//! grants each database should have, compares it against every listed
//! server, and issues only the statements needed to close the gap.
//!
//! # Safety Guarantees
//! - Dry-run unless `--apply` is given
//! - Every attempted change lands in a JSON audit file
//! - Passwords are never logged

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlperms_core::{
    AuditDetail, ExecutionMode, JsonFileSink, LogFormat, LoggingConfig, PermissionsConfig,
    RunOptions, RunSummary, init_logging,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sqlperms")]
#[command(about = "Reconcile SQL Server logins, users, roles, and grants")]
#[command(version)]
#[command(long_about = "
sqlperms - Declarative SQL Server permission management

Reads a JSON configuration listing servers, databases, and the principals
each database should have, then creates missing Windows logins and database
users, adds role memberships, and grants permissions.

SAFETY:
- Dry-run by default: statements are logged and audited, never executed
- Pass --apply to make changes
- Every operation is written to a JSON audit file

AUTHENTICATION:
- auth_type \"windows\" (the default) uses integrated authentication and
  only works when sqlperms runs on a Windows host
- On Linux and macOS set auth_type \"sql\" with username and password
  (or password_env) for every server

EXIT STATUS:
  0  all operations succeeded (or would have, in dry-run)
  1  one or more operations or server connections failed
  2  configuration or setup error

EXAMPLES:
  sqlperms -c permissions.json
  sqlperms -c permissions.json --apply --audit-dir /var/log/sqlperms
  sqlperms -c permissions.json validate
  sqlperms -c permissions.json test
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file
    #[arg(
        short,
        long,
        env = "SQLPERMS_CONFIG",
        global = true,
        help = "Path to the permissions JSON file"
    )]
    pub config: Option<PathBuf>,

    /// Apply changes
    #[arg(long, help = "Apply changes (default is dry-run preview)")]
    pub apply: bool,

    /// Audit output directory
    #[arg(
        long,
        default_value = ".",
        help = "Directory for sql_permissions_audit_<timestamp>.json"
    )]
    pub audit_dir: PathBuf,

    /// Audit output file
    #[arg(long, conflicts_with = "audit_dir", help = "Exact audit file path (overrides --audit-dir)")]
    pub audit_file: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "30",
        global = true,
        help = "Seconds to wait for each server connection"
    )]
    pub connect_timeout: u64,

    /// Statement timeout in seconds
    #[arg(long, default_value = "30", global = true, help = "Seconds to wait for each statement")]
    pub statement_timeout: u64,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Validate the configuration without contacting any server
    Validate,
    /// Connect to every configured server and report
    Test,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase verbosity (-v, -vv); also records SQL for dry-run audit entries"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all log output except errors")]
    pub quiet: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormatArg,

    /// Log file
    #[arg(long, global = true, help = "Also write log events to this file")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// Exit status for a run that completed with failed operations.
const EXIT_FAILURES: u8 = 1;
/// Exit status for configuration and setup errors.
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&LoggingConfig {
        verbose: cli.global.verbose,
        quiet: cli.global.quiet,
        format: cli.global.log_format.into(),
        log_file: cli.global.log_file.clone(),
    }) {
        eprintln!("Error: {}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    match dispatch(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn dispatch(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli
        .config
        .as_deref()
        .context("a configuration file is required (--config or SQLPERMS_CONFIG)")?;
    let config = load_config(config_path)?;

    match cli.command {
        Some(Command::Validate) => {
            println!("Configuration is valid: {}", config_path.display());
            println!("Servers: {}", config.servers.len());
            println!("Permission entries: {}", config.entry_count());
            println!("Planned role/grant operations: {}", config.operation_count());
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Test) => test_connections(cli, &config).await,
        None => run(cli, &config).await,
    }
}

fn load_config(path: &Path) -> anyhow::Result<PermissionsConfig> {
    info!("Loading configuration from {}", path.display());
    let config = PermissionsConfig::load(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))?;
    info!(
        "Loaded {} server(s), {} permission entr(ies)",
        config.servers.len(),
        config.entry_count()
    );
    Ok(config)
}

fn run_options(cli: &Cli) -> anyhow::Result<RunOptions> {
    let mode = if cli.apply {
        ExecutionMode::Live
    } else {
        ExecutionMode::DryRun
    };
    let audit_detail = if cli.global.verbose > 0 {
        AuditDetail::Verbose
    } else {
        AuditDetail::Standard
    };

    let options = RunOptions::new(mode)
        .with_audit_detail(audit_detail)
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout))
        .with_statement_timeout(Duration::from_secs(cli.statement_timeout));
    options.validate().context("invalid run options")?;
    Ok(options)
}

fn audit_sink(cli: &Cli) -> JsonFileSink {
    match &cli.audit_file {
        Some(path) => JsonFileSink::at_path(path),
        None => JsonFileSink::in_directory(&cli.audit_dir),
    }
}

#[cfg(feature = "mssql")]
async fn run(cli: &Cli, config: &PermissionsConfig) -> anyhow::Result<ExitCode> {
    use sqlperms_core::{MssqlConnector, Reconciler};

    let options = run_options(cli)?;
    let reconciler = Reconciler::new(MssqlConnector::new(), options);
    let summary = reconciler.run(config, &audit_sink(cli)).await;

    print_summary(&summary);

    if summary.has_failures() {
        Ok(ExitCode::from(EXIT_FAILURES))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(feature = "mssql")]
async fn test_connections(cli: &Cli, config: &PermissionsConfig) -> anyhow::Result<ExitCode> {
    use sqlperms_core::{MssqlConnector, Reconciler};

    let reconciler = Reconciler::new(MssqlConnector::new(), run_options(cli)?);
    let results = reconciler.test_connections(config).await;

    let mut failures = 0_usize;
    for (server, result) in &results {
        match result {
            Ok(()) => println!("✓ {}: connection successful", server),
            Err(e) => {
                failures += 1;
                println!("✗ {}: {}", server, e);
            }
        }
    }
    println!("{} of {} server(s) reachable", results.len() - failures, results.len());

    if failures > 0 {
        Ok(ExitCode::from(EXIT_FAILURES))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(not(feature = "mssql"))]
async fn run(_cli: &Cli, _config: &PermissionsConfig) -> anyhow::Result<ExitCode> {
    anyhow::bail!("SQL Server support not compiled in; rebuild with --features mssql")
}

#[cfg(not(feature = "mssql"))]
async fn test_connections(_cli: &Cli, _config: &PermissionsConfig) -> anyhow::Result<ExitCode> {
    anyhow::bail!("SQL Server support not compiled in; rebuild with --features mssql")
}

fn print_summary(summary: &RunSummary) {
    let rule = "=".repeat(80);
    println!("{}", rule);
    println!("SUMMARY");
    println!("{}", rule);
    println!("Mode: {}", summary.mode);
    println!("Successful operations: {}", summary.total_success());
    println!("Failed operations: {}", summary.total_failed());
    if summary.entries_skipped > 0 {
        println!("Skipped entries: {}", summary.entries_skipped);
    }
    for failure in &summary.failed_servers {
        println!("Unreachable server: {} ({})", failure.server, failure.error_message);
    }
    match (&summary.audit_location, &summary.audit_error) {
        (Some(location), _) => println!("Audit log: {}", location),
        (None, Some(err)) => println!("Audit log could not be written: {}", err),
        (None, None) => {}
    }
    if summary.mode.is_dry_run() {
        println!();
        println!("DRY-RUN MODE: No changes were applied");
        println!("Run with --apply to apply changes");
    }
    println!("{}", rule);
}
