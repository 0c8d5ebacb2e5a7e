mod config;
mod hashing;
mod output;
mod plan;
mod scanner;
mod source;
mod summary;

use clap::Parser;
use config::PglogConfig;
use output::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Extract auto_explain query plans from PostgreSQL logs: durations, query
/// text and per-node cost/row/timing statistics, as JSON or text.
#[derive(Parser, Debug)]
#[command(name = "pglog-plans", version, about)]
pub struct Cli {
    /// Log files or glob patterns (overrides config)
    #[arg(value_name = "INPUT")]
    inputs: Vec<String>,

    /// Config file path
    #[arg(short, long, default_value = "pglog.toml")]
    config: PathBuf,

    /// Output file (overrides config; default stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (overrides config)
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Read plans from a JSON document written earlier instead of scanning logs
    #[arg(long, value_name = "FILE", conflicts_with = "inputs")]
    plans: Option<PathBuf>,

    /// Fingerprint query text into query_hash
    #[arg(long)]
    hash: bool,

    /// Print the slowest recurring queries after extraction
    #[arg(long)]
    summary: bool,

    /// Number of query groups in the summary, 0 for all (overrides config)
    #[arg(long)]
    top: Option<usize>,

    /// Validate config and print resolved settings, don't scan
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-file and per-scan details)
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors and skipped-line warnings
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "pglog_plans=debug"
    } else if cli.quiet {
        "pglog_plans=warn"
    } else {
        "pglog_plans=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    if let Err(e) = run(&cli) {
        tracing::error!(error = %e, "pglog-plans failed");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = PglogConfig::load(&cli.config)?;
    apply_overrides(&mut cfg, cli);

    if cli.dry_run {
        print!("{}", describe(&cfg));
        return Ok(());
    }

    let plans = match &cli.plans {
        Some(path) => output::read_plans(path)?,
        None => {
            let files = source::expand_inputs(&cfg.input.paths)?;
            let plans = source::scan_files(&files, cfg.scan.options())?;
            tracing::info!(files = files.len(), plans = plans.len(), "extraction complete");
            plans
        }
    };

    output::write_plans(&plans, cfg.output.format, cfg.output.path.as_deref())?;

    if cfg.summary.enabled {
        let table = summary::render_summary(&summary::summarize(&plans), cfg.summary.top);
        // Keep stdout clean when it already carries the plan document.
        if cfg.output.path.is_some() {
            print!("{table}");
        } else {
            eprint!("{table}");
        }
    }

    Ok(())
}

/// Merge CLI flags over file config. Boolean flags can only switch features on.
fn apply_overrides(cfg: &mut PglogConfig, cli: &Cli) {
    if !cli.inputs.is_empty() {
        cfg.input.paths = cli.inputs.clone();
    }
    if let Some(path) = &cli.output {
        cfg.output.path = Some(path.clone());
    }
    if let Some(format) = cli.format {
        cfg.output.format = format;
    }
    if cli.hash {
        cfg.scan.hash_queries = true;
    }
    if cli.summary {
        cfg.summary.enabled = true;
    }
    if let Some(top) = cli.top {
        cfg.summary.top = top;
    }
}

fn describe(cfg: &PglogConfig) -> String {
    let output = cfg
        .output
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "stdout".to_string());
    format!(
        "inputs: {}\nhash_queries: {}\noutput: {} ({:?})\nsummary: {} (top {})\n",
        cfg.input.paths.join(", "),
        cfg.scan.hash_queries,
        output,
        cfg.output.format,
        cfg.summary.enabled,
        cfg.summary.top
    )
}
