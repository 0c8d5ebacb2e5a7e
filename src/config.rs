use crate::output::OutputFormat;
use crate::scanner::ScanOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from pglog.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PglogConfig {
    pub input: InputConfig,
    pub scan: ScanConfig,
    pub output: OutputConfig,
    pub summary: SummaryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Log files or glob patterns, scanned in order.
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ScanConfig {
    pub hash_queries: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct OutputConfig {
    /// Destination file; stdout when unset.
    pub path: Option<PathBuf>,
    pub format: OutputFormat,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    /// Number of query groups to show; 0 shows all.
    pub top: usize,
}

// --- Default implementations ---

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            paths: vec!["postgresql.log".to_string()],
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top: 20,
        }
    }
}

impl ScanConfig {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            hash_queries: self.hash_queries,
        }
    }
}

impl PglogConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Errors from loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}
