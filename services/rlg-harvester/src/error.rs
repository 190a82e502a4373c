//! Error types for crawl execution and result collection

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Failures surfaced to callers of the runner and facade.
///
/// Record-level conditions (duplicates, enrichment misses) never appear here;
/// they are absorbed by the pipeline and the merger.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("No data retrieved: output channel {} was never written", path.display())]
    NoData { path: PathBuf },

    #[error("Malformed record in {} at line {line}: {source}", path.display())]
    ChannelParse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Crawl worker exited abnormally ({status})")]
    ChildExecutionFailure { status: ExitStatus },

    #[error("Crawl worker did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Failed to launch crawl worker {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Crawl engine failure: {0}")]
    Engine(String),

    #[error("Failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for HarvestError {
    fn from(e: config::ConfigError) -> Self {
        HarvestError::Config(e.to_string())
    }
}

/// Result type for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;
