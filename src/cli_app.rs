//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use pool_exhaustion_harness::classify::log_classifier::{ErrorTally, LogClassifier, tally_lines};
use pool_exhaustion_harness::cluster::dmg::DmgPoolService;
use pool_exhaustion_harness::cluster::pool::{PoolHandle, PoolService};
use pool_exhaustion_harness::cluster::remote::SshExecutor;
use pool_exhaustion_harness::cluster::sim::{SimConfig, SimFault, SimulatedPool};
use pool_exhaustion_harness::core::config::{Config, ReclaimStrategy};
use pool_exhaustion_harness::core::errors::{ErrorCategory, PxhError};
use pool_exhaustion_harness::core::tier::Tier;
use pool_exhaustion_harness::load::driver::FillOutcome;
use pool_exhaustion_harness::logger::activity::{
    ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use pool_exhaustion_harness::logger::jsonl::JsonlConfig;
use pool_exhaustion_harness::protocol::scenario::{
    Collaborators, ExhaustionScenario, PoolTarget, RunOutcome, RunSummary,
};
use pool_exhaustion_harness::protocol::trial::TrialReport;

/// Pool Exhaustion Harness: drive a storage pool to capacity and verify it recovers.
#[derive(Debug, Parser)]
#[command(
    name = "pxh",
    author,
    version,
    about = "Pool Exhaustion Harness - capacity exhaustion and reclaim checks",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the exhaustion protocol against a real pool.
    Run(RunArgs),
    /// Run the exhaustion protocol against an in-memory simulated pool.
    Simulate(SimulateArgs),
    /// Classify error lines in client log files.
    Classify(ClassifyArgs),
    /// Show per-tier capacity of an existing pool.
    Probe(ProbeArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Overrides shared by `run` and `simulate`.
#[derive(Debug, Clone, Args)]
struct ProtocolArgs {
    /// Number of trials.
    #[arg(long, value_name = "N")]
    iterations: Option<u32>,
    /// Tier to exhaust (scm or nvme).
    #[arg(long, value_name = "TIER")]
    tier: Option<Tier>,
    /// Reclaim wait strategy (fixed or poll).
    #[arg(long, value_name = "STRATEGY")]
    strategy: Option<ReclaimStrategy>,
    /// Settling window after teardown, in seconds.
    #[arg(long, value_name = "SECONDS")]
    settle_secs: Option<u64>,
    /// Interval between capacity probes with the poll strategy.
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[command(flatten)]
    protocol: ProtocolArgs,
    /// Use an existing pool instead of creating one.
    #[arg(long, value_name = "UUID")]
    pool: Option<String>,
    /// Override the JSONL run log path.
    #[arg(long, value_name = "PATH", conflicts_with = "no_log")]
    log: Option<PathBuf>,
    /// Do not write a JSONL run log.
    #[arg(long)]
    no_log: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FaultArg {
    /// Accept writes past the ceiling.
    AcceptOverfill,
    /// Keep part of every destroyed container's space (see --leak-pct).
    Leak,
    /// Log an unrelated error next to every refused write.
    SpuriousLogError,
    /// Fail every container destroy.
    DestroyFails,
    /// Fail every pool operation.
    Unreachable,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    #[command(flatten)]
    protocol: ProtocolArgs,
    /// Inject a fault into the simulated pool (repeatable).
    #[arg(long = "fault", value_enum, value_name = "FAULT")]
    faults: Vec<FaultArg>,
    /// Percentage of destroyed space kept by the leak fault.
    #[arg(long, default_value_t = 8.75, value_name = "PCT")]
    leak_pct: f64,
    /// Space queries that pass before destroyed space is released.
    #[arg(long, default_value_t = 0, value_name = "N")]
    reclaim_lag: u32,
    /// Symmetric free-space noise, in percent of tier capacity.
    #[arg(long, default_value_t = 0.0, value_name = "PCT")]
    noise_pct: f64,
    /// Seed for the noise generator.
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
    /// Simulated SCM capacity in bytes.
    #[arg(long, default_value_t = 64 << 30, value_name = "BYTES")]
    scm_bytes: u64,
    /// Simulated NVMe capacity in bytes.
    #[arg(long, default_value_t = 1 << 40, value_name = "BYTES")]
    nvme_bytes: u64,
    /// Write a JSONL run log to this path.
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ClassifyArgs {
    /// Log files to classify.
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,
    /// Collect from these hosts over ssh instead of reading local files.
    #[arg(long, value_delimiter = ',', value_name = "HOST")]
    hosts: Vec<String>,
    /// Marker selecting error lines (default from config).
    #[arg(long, value_name = "TEXT")]
    error_marker: Option<String>,
    /// Marker identifying expected exhaustion signals (default from config).
    #[arg(long, value_name = "TEXT")]
    marker: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ProbeArgs {
    /// Pool UUID or label.
    #[arg(long, value_name = "UUID")]
    pool: String,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration and print its hash.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad arguments or configuration.
    #[error("{0}")]
    User(String),
    /// Infrastructure failure; says nothing about the pool under test.
    #[error("{0}")]
    Runtime(String),
    /// The pool under test violated the exhaustion contract.
    #[error("{0}")]
    Violation(String),
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) | Self::Json(_) => 2,
            Self::Violation(_) => 3,
        }
    }
}

impl CliError {
    fn categorized(category: ErrorCategory, message: String) -> Self {
        match category {
            ErrorCategory::Configuration => Self::User(message),
            ErrorCategory::Infrastructure => Self::Runtime(message),
            ErrorCategory::ContractViolation => Self::Violation(message),
        }
    }
}

impl From<PxhError> for CliError {
    fn from(error: PxhError) -> Self {
        Self::categorized(error.category(), error.to_string())
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_protocol(cli, args),
        Command::Simulate(args) => run_simulate(cli, args),
        Command::Classify(args) => run_classify(cli, args),
        Command::Probe(args) => run_probe(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli, overrides: Option<&ProtocolArgs>) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(args) = overrides {
        if let Some(iterations) = args.iterations {
            config.trial.iterations = iterations;
        }
        if let Some(tier) = args.tier {
            config.trial.tier = tier;
        }
        if let Some(strategy) = args.strategy {
            config.reclaim.strategy = strategy;
        }
        if let Some(secs) = args.settle_secs {
            config.reclaim.settle_secs = secs;
        }
        if let Some(ms) = args.poll_interval_ms {
            config.reclaim.poll_interval_ms = ms;
        }
        config.validate()?;
    }
    Ok(config)
}

fn run_protocol(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(cli, Some(&args.protocol))?;
    let log_path = if args.no_log {
        None
    } else {
        Some(args.log.clone().unwrap_or_else(|| config.paths.jsonl_log.clone()))
    };
    let target = PoolTarget::from_config(&config, args.pool.as_deref());

    let summary = with_activity_log(log_path, |activity| {
        ExhaustionScenario::new(&config, Collaborators::from_config(&config), activity).run(target)
    })??;
    report_summary(cli, &config, &summary)
}

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), CliError> {
    let config = load_config(cli, Some(&args.protocol))?;
    let faults = args
        .faults
        .iter()
        .map(|fault| match fault {
            FaultArg::AcceptOverfill => SimFault::AcceptOverfill,
            FaultArg::Leak => SimFault::LeakOnDestroy { pct: args.leak_pct },
            FaultArg::SpuriousLogError => SimFault::SpuriousLogError,
            FaultArg::DestroyFails => SimFault::DestroyFails,
            FaultArg::Unreachable => SimFault::Unreachable,
        })
        .collect();
    let sim = Arc::new(SimulatedPool::new(SimConfig {
        tiers: vec![(Tier::Scm, args.scm_bytes), (Tier::Nvme, args.nvme_bytes)],
        reclaim_lag_queries: args.reclaim_lag,
        noise_pct: args.noise_pct,
        seed: args.seed,
        client_host: config
            .logs
            .client_hosts
            .first()
            .cloned()
            .unwrap_or_else(|| "localhost".to_string()),
        log_dir: config.logs.log_dir.clone(),
        faults,
        ..SimConfig::default()
    }));
    let target = PoolTarget::from_config(&config, None);

    let summary = with_activity_log(args.log.clone(), |activity| {
        ExhaustionScenario::new(&config, Collaborators::simulated(&sim), activity).run(target)
    })??;
    report_summary(cli, &config, &summary)
}

/// Run `f` with a live activity logger, then flush it before returning.
fn with_activity_log<T>(
    path: Option<PathBuf>,
    f: impl FnOnce(ActivityLoggerHandle) -> T,
) -> Result<T, CliError> {
    let Some(path) = path else {
        return Ok(f(ActivityLoggerHandle::detached()));
    };
    let (handle, join) = spawn_logger(ActivityLoggerConfig::new(JsonlConfig::for_path(path)))?;
    let result = f(handle.clone());
    handle.shutdown();
    join.join()
        .map_err(|_| CliError::Runtime("activity logger thread panicked".to_string()))?;
    Ok(result)
}

fn report_summary(cli: &Cli, config: &Config, summary: &RunSummary) -> Result<(), CliError> {
    let tier = config.trial.tier;
    match output_mode(cli) {
        OutputMode::Json => {
            let mut payload = summary.to_json();
            payload["command"] = json!("run");
            write_json_line(&payload)?;
        }
        OutputMode::Human => {
            if !cli.quiet {
                println!(
                    "{} {} ({}), {} trial(s) on {tier}",
                    "pool".bold(),
                    summary.pool.label,
                    summary.pool.uuid,
                    config.trial.iterations
                );
                if cli.verbose {
                    println!("  initial capacity: {}", summary.initial);
                    println!("  config hash: {}", summary.config_hash);
                }
            }
            match &summary.outcome {
                RunOutcome::Passed(report) => {
                    if !cli.quiet {
                        for trial in &report.trials {
                            print_trial(cli, config, trial);
                        }
                        let smoke = match &report.smoke_fill {
                            FillOutcome::Completed { bytes, .. } => format!("{bytes} bytes"),
                            other => other.label().to_string(),
                        };
                        println!(
                            "{} {} trial(s), {} exhaustion signal(s), smoke fill {smoke}",
                            "PASS".green().bold(),
                            report.ledger.completed_trials,
                            report.ledger.expected_signals,
                        );
                    }
                }
                RunOutcome::Failed(failure) => {
                    println!("{} {failure}", "FAIL".red().bold());
                }
            }
        }
    }

    match &summary.outcome {
        RunOutcome::Passed(_) => Ok(()),
        RunOutcome::Failed(failure) => Err(CliError::categorized(
            failure.error.category(),
            failure.to_string(),
        )),
    }
}

fn print_trial(cli: &Cli, config: &Config, trial: &TrialReport) {
    println!(
        "  trial {:>3}: {} signal(s), {} container(s) destroyed, {:.1}% free after {} probe(s)",
        trial.index + 1,
        trial.ledger.expected_signals,
        trial.destroyed,
        trial.reclaim.free_pct,
        trial.reclaim.probes,
    );
    if cli.verbose {
        println!(
            "             nominal {}% {}, overfill {}% {}, {:.1}% free before teardown",
            config.trial.nominal_fill_pct,
            trial.nominal.label(),
            config.trial.overfill_pct,
            trial.overfill.label(),
            trial.baseline_free_pct,
        );
    }
}

fn run_classify(cli: &Cli, args: &ClassifyArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let mut logs = config.logs.clone();
    if let Some(marker) = &args.error_marker {
        logs.error_marker.clone_from(marker);
    }
    if let Some(marker) = &args.marker {
        logs.exhaustion_marker.clone_from(marker);
    }

    let mut per_file = Vec::with_capacity(args.files.len());
    if args.hosts.is_empty() {
        for file in &args.files {
            let raw = fs::read_to_string(file).map_err(|source| PxhError::io(file, source))?;
            let errors: Vec<&str> = raw
                .lines()
                .filter(|line| line.contains(logs.error_marker.as_str()))
                .collect();
            per_file.push((file.clone(), tally_lines(&errors, &logs.exhaustion_marker)));
        }
    } else {
        let classifier = LogClassifier::new(Arc::new(SshExecutor::new(&config.remote)), &logs);
        for file in &args.files {
            per_file.push((file.clone(), classifier.classify(&args.hosts, file)?));
        }
    }

    let total = per_file
        .iter()
        .fold(ErrorTally::default(), |acc, (_, tally)| ErrorTally {
            expected_signals: acc.expected_signals + tally.expected_signals,
            other_errors: acc.other_errors + tally.other_errors,
        });

    match output_mode(cli) {
        OutputMode::Json => {
            let files: Vec<Value> = per_file
                .iter()
                .map(|(path, tally)| {
                    json!({
                        "path": path.to_string_lossy(),
                        "expected_signals": tally.expected_signals,
                        "other_errors": tally.other_errors,
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "classify",
                "files": files,
                "total": total,
                "clean": total.is_clean(),
            }))?;
        }
        OutputMode::Human => {
            for (path, tally) in &per_file {
                println!(
                    "{}: {} expected, {} other",
                    path.display(),
                    tally.expected_signals,
                    tally.other_errors
                );
            }
            if per_file.len() > 1 || cli.verbose {
                println!(
                    "total: {} expected, {} other",
                    total.expected_signals, total.other_errors
                );
            }
            if total.is_clean() {
                if !cli.quiet {
                    println!("{}", "clean".green());
                }
            } else {
                println!("{}", "unexpected errors present".yellow());
            }
        }
    }
    Ok(())
}

fn run_probe(cli: &Cli, args: &ProbeArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let pool = PoolHandle::existing(args.pool.clone());
    let report = DmgPoolService::new(&config.pool).query_space(&pool)?;

    match output_mode(cli) {
        OutputMode::Json => {
            let tiers: Vec<Value> = report
                .iter()
                .map(|(tier, usage)| {
                    json!({
                        "tier": tier,
                        "total_bytes": usage.total_bytes,
                        "free_bytes": usage.free_bytes,
                        "free_pct": usage.free_pct(),
                        "used_pct": usage.used_pct(),
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "probe",
                "pool": pool.uuid,
                "tiers": tiers,
            }))?;
        }
        OutputMode::Human => {
            println!("{} {}", "pool".bold(), pool.uuid);
            for (tier, usage) in report.iter() {
                let free = format!("{:5.1}% free", usage.free_pct());
                let free = if usage.free_pct() >= config.reclaim.high_water_free_pct {
                    free.as_str().green()
                } else {
                    free.as_str().yellow()
                };
                println!(
                    "  {:<5} {free}  ({} of {} bytes used)",
                    tier.as_str(),
                    usage.used_bytes(),
                    usage.total_bytes
                );
            }
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{rendered}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("PXH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };
    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
