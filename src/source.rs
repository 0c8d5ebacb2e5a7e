//! Log file input: glob expansion, plain and zstd-compressed readers.
//!
//! Each file gets its own `PlanScanner`, so a plan never spans two files.
//! Rotated logs compressed with zstd (`postgresql-*.log.zst`) are decoded on
//! the fly.

use crate::plan::Plan;
use crate::scanner::{self, ScanOptions};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Open a log file for line reading, decompressing `.zst` files transparently.
pub fn open_lines(path: &Path) -> Result<Box<dyn BufRead>, SourceError> {
    let file = File::open(path).map_err(|e| SourceError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;

    if is_zstd(path) {
        let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| SourceError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn is_zstd(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("zst")
}

/// Scan one log file into plans.
pub fn scan_file(path: &Path, options: ScanOptions) -> Result<Vec<Plan>, SourceError> {
    let reader = open_lines(path)?;
    let plans = scanner::scan_reader(reader, options).map_err(|e| SourceError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    tracing::info!(file = %path.display(), plans = plans.len(), "scanned log file");
    Ok(plans)
}

/// Scan several files in order and concatenate their plans.
pub fn scan_files(paths: &[PathBuf], options: ScanOptions) -> Result<Vec<Plan>, SourceError> {
    let mut plans = Vec::new();
    for path in paths {
        plans.extend(scan_file(path, options)?);
    }
    Ok(plans)
}

/// Resolve configured inputs into an ordered, de-duplicated list of files.
///
/// Inputs containing glob metacharacters are expanded (matches sorted);
/// anything else is taken as a literal path and checked when opened.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>, SourceError> {
    let mut files: Vec<PathBuf> = Vec::new();

    for input in inputs {
        if !input.contains(['*', '?', '[']) {
            push_unique(&mut files, PathBuf::from(input));
            continue;
        }

        let entries = glob::glob(input).map_err(|e| SourceError::Pattern {
            pattern: input.clone(),
            source: e,
        })?;

        let mut matched = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => matched.push(path),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, pattern = %input, "skipping unreadable glob match")
                }
            }
        }

        if matched.is_empty() {
            return Err(SourceError::NoMatch {
                pattern: input.clone(),
            });
        }

        matched.sort();
        tracing::debug!(pattern = %input, files = matched.len(), "expanded input pattern");
        for path in matched {
            push_unique(&mut files, path);
        }
    }

    Ok(files)
}

fn push_unique(files: &mut Vec<PathBuf>, path: PathBuf) {
    if !files.contains(&path) {
        files.push(path);
    }
}

/// Errors from locating or reading log input.
#[derive(Debug)]
pub enum SourceError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    NoMatch {
        pattern: String,
    },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Open { path, source } => {
                write!(f, "failed to open log file {}: {source}", path.display())
            }
            SourceError::Read { path, source } => {
                write!(f, "failed to read log file {}: {source}", path.display())
            }
            SourceError::Pattern { pattern, source } => {
                write!(f, "invalid input pattern {pattern:?}: {source}")
            }
            SourceError::NoMatch { pattern } => {
                write!(f, "input pattern {pattern:?} matched no files")
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Open { source, .. } => Some(source),
            SourceError::Read { source, .. } => Some(source),
            SourceError::Pattern { source, .. } => Some(source),
            SourceError::NoMatch { .. } => None,
        }
    }
}
