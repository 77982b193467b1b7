//! stagegate - capability-scoped agent pipeline runner
//!
//! ## Commands
//!
//! - `run`: execute the standard pipeline for a project payload
//! - `permissions`: print the effective permission table
//! - `audit`: summarize an audit log

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use stagegate_core::authz::{read_audit_log, AuditEntry};
use stagegate_core::{GateConfig, OrchestrationResult, RunInput};

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(version = stagegate_core::VERSION)]
#[command(about = "Capability-scoped agent pipeline runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// Root directory for run output
    #[arg(long, env = "STAGEGATE_OUTPUT_DIR", default_value = "stagegate-out")]
    output_dir: PathBuf,

    /// Audit log path (default: <output-dir>/audit.jsonl)
    #[arg(long, env = "STAGEGATE_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Permission table JSON (default: the standard table)
    #[arg(long, env = "STAGEGATE_PERMISSIONS")]
    permissions: Option<PathBuf>,

    /// Directory of prompt templates overriding the built-ins
    #[arg(long, env = "STAGEGATE_TEMPLATES")]
    templates: Option<PathBuf>,

    /// Directory of markdown documents for retrieval
    #[arg(long, env = "STAGEGATE_DOCS")]
    docs: Option<PathBuf>,
}

impl From<ConfigArgs> for GateConfig {
    fn from(args: ConfigArgs) -> Self {
        Self {
            output_dir: args.output_dir,
            audit_log: args.audit_log,
            permissions: args.permissions,
            templates: args.templates,
            docs: args.docs,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for a project payload
    Run {
        /// Run input (JSON with project_name, target_profile, modules, ...)
        #[arg(short, long)]
        input: PathBuf,

        /// Produce design metadata only; skip code generation and later stages
        #[arg(long)]
        metadata_only: bool,

        /// Write the full orchestration result as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the effective permission table as JSON
    Permissions {
        /// Permission table JSON (default: the standard table)
        #[arg(long, env = "STAGEGATE_PERMISSIONS")]
        permissions: Option<PathBuf>,
    },

    /// Summarize an audit log
    Audit {
        /// Path to a JSONL audit log
        log: PathBuf,

        /// Only list denied requests
        #[arg(long)]
        denied_only: bool,

        /// Only include entries from this run
        #[arg(long)]
        run: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stagegate_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            input,
            metadata_only,
            report,
            config,
        } => cmd_run(config.into(), &input, metadata_only, report.as_deref()).await,
        Commands::Permissions { permissions } => cmd_permissions(permissions),
        Commands::Audit {
            log,
            denied_only,
            run,
        } => cmd_audit(&log, denied_only, run.as_deref()),
    }
}

async fn cmd_run(
    config: GateConfig,
    input_path: &Path,
    metadata_only: bool,
    report: Option<&Path>,
) -> Result<()> {
    let result = execute_run(&config, input_path, metadata_only).await?;

    println!("run:     {}", result.run_id);
    println!("output:  {}", result.output_dir.display());
    println!("audit:   {} ({} checks)", config.audit_log_path().display(), result.authorizations);
    for stage in &result.stages {
        println!("  {:<14} {}", stage.name, stage.state);
    }

    if let Some(path) = report {
        let body = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, body)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    if !result.success {
        anyhow::bail!("run {} failed: {}", result.run_id, result.message);
    }
    println!("{}", result.message);
    Ok(())
}

async fn execute_run(
    config: &GateConfig,
    input_path: &Path,
    metadata_only: bool,
) -> Result<OrchestrationResult> {
    let mut input = RunInput::load(input_path)
        .with_context(|| format!("reading run input {}", input_path.display()))?;
    input.metadata_only |= metadata_only;

    let orchestrator = config.build_orchestrator()?;
    Ok(orchestrator.run(input).await)
}

fn cmd_permissions(permissions: Option<PathBuf>) -> Result<()> {
    let config = GateConfig {
        permissions,
        ..GateConfig::new(".")
    };
    let table = config.load_permissions()?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct AuditSummary {
    total: usize,
    denied: usize,
    runs: usize,
}

fn summarize(entries: &[AuditEntry]) -> AuditSummary {
    let runs: std::collections::BTreeSet<_> =
        entries.iter().filter_map(|e| e.run_id.as_deref()).collect();
    AuditSummary {
        total: entries.len(),
        denied: entries.iter().filter(|e| !e.allowed).count(),
        runs: runs.len(),
    }
}

fn cmd_audit(log: &Path, denied_only: bool, run: Option<&str>) -> Result<()> {
    let entries: Vec<AuditEntry> = read_audit_log(log)
        .with_context(|| format!("reading audit log {}", log.display()))?
        .into_iter()
        .filter(|e| run.is_none() || e.run_id.as_deref() == run)
        .collect();

    for entry in entries.iter().filter(|e| !denied_only || !e.allowed) {
        println!(
            "{:>5} {} {:<5} {:<24} {:<7} {} {}",
            entry.seq,
            entry.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            if entry.allowed { "ALLOW" } else { "DENY" },
            entry.agent_id,
            entry.action,
            entry.resource,
            entry.reason.as_deref().unwrap_or(""),
        );
    }

    let summary = summarize(&entries);
    println!(
        "{} entries, {} denied, {} run(s)",
        summary.total, summary.denied, summary.runs
    );
    Ok(())
}
