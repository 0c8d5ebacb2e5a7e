//! Plan output: JSON document, JSON Lines, or a console rendering.
//!
//! File destinations are written atomically (temp file in the same directory,
//! then rename) so a reader never sees a half-written document.

use crate::plan::Plan;
use serde::Deserialize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Serialization format for extracted plans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed JSON array.
    #[default]
    Json,
    /// One compact JSON plan per line.
    Jsonl,
    /// Human-readable listing.
    Text,
}

/// Render plans in the given format.
pub fn render(plans: &[Plan], format: OutputFormat) -> Result<String, OutputError> {
    match format {
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(plans)
                .map_err(|e| OutputError::Serialize { source: e })?;
            json.push('\n');
            Ok(json)
        }
        OutputFormat::Jsonl => {
            let mut out = String::new();
            for plan in plans {
                let line = serde_json::to_string(plan)
                    .map_err(|e| OutputError::Serialize { source: e })?;
                out.push_str(&line);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Text => Ok(render_text(plans)),
    }
}

fn render_text(plans: &[Plan]) -> String {
    let mut out = String::new();
    for (i, plan) in plans.iter().enumerate() {
        let _ = writeln!(out, "Plan {} ({} ms)", i + 1, plan.duration_ms);
        let _ = writeln!(
            out,
            "  query: {}",
            plan.query_text.as_deref().unwrap_or("(none)")
        );
        if let Some(hash) = &plan.query_hash {
            let _ = writeln!(out, "  hash:  {hash}");
        }
        if plan.operations.is_empty() {
            let _ = writeln!(out, "  operations: (none)");
        } else {
            let _ = writeln!(out, "  operations:");
        }
        for op in &plan.operations {
            let _ = write!(
                out,
                "    {}  cost={:.2}..{:.2} rows={} width={}",
                op.operation_name, op.cost_start, op.cost_end, op.estimated_rows, op.width
            );
            if let Some(actual) = op.actual {
                let _ = write!(
                    out,
                    "  actual time={:.3}..{:.3} rows={} loops={}",
                    actual.time_start, actual.time_end, actual.rows, actual.loops
                );
            }
            out.push('\n');
        }
    }
    out
}

/// Write plans to `dest`, or to stdout when no destination is given.
pub fn write_plans(
    plans: &[Plan],
    format: OutputFormat,
    dest: Option<&Path>,
) -> Result<(), OutputError> {
    let rendered = render(plans, format)?;
    match dest {
        Some(path) => {
            write_atomic(path, rendered.as_bytes())?;
            tracing::info!(path = %path.display(), plans = plans.len(), "wrote plans");
            Ok(())
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|e| OutputError::Stdout { source: e })
        }
    }
}

/// Atomically replace `path` with `contents`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), OutputError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| OutputError::Write {
        path: dir.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(contents).map_err(|e| OutputError::Write {
        path: tmp.path().to_path_buf(),
        source: e,
    })?;
    tmp.persist(path).map_err(|e| OutputError::Rename {
        to: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Load a JSON plan document previously written in `json` format.
pub fn read_plans(path: &Path) -> Result<Vec<Plan>, OutputError> {
    let contents = std::fs::read_to_string(path).map_err(|e| OutputError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| OutputError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Errors from writing or reading plan output.
#[derive(Debug)]
pub enum OutputError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        to: PathBuf,
        source: std::io::Error,
    },
    Stdout {
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::Serialize { source } => write!(f, "failed to serialize plans: {source}"),
            OutputError::Write { path, source } => {
                write!(f, "failed to write temp output in {}: {source}", path.display())
            }
            OutputError::Rename { to, source } => {
                write!(f, "failed to move output into {}: {source}", to.display())
            }
            OutputError::Stdout { source } => write!(f, "failed to write to stdout: {source}"),
            OutputError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            OutputError::Parse { path, source } => {
                write!(f, "failed to parse plans from {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OutputError::Serialize { source } => Some(source),
            OutputError::Write { source, .. } => Some(source),
            OutputError::Rename { source, .. } => Some(source),
            OutputError::Stdout { source } => Some(source),
            OutputError::Read { source, .. } => Some(source),
            OutputError::Parse { source, .. } => Some(source),
        }
    }
}
