//! Error types for pkgtrust

use thiserror::Error;

/// Convenience Result type for scan operations
pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Unsupported ecosystem: {0}")]
    UnsupportedEcosystem(String),

    #[error("Invalid package name: {0}")]
    InvalidName(String),

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    /// Source-host API quota exhausted. This aborts the scan; it is the only
    /// non-recoverable network condition.
    #[error(
        "Source-host API rate limit exhausted; set GITHUB_TOKEN to raise the anonymous hourly quota"
    )]
    SourceHostRateLimit,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("{0}")]
    Other(String),
}

impl ScanError {
    /// True for the sticky condition that stops new work from being dispatched.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceHostRateLimit)
    }
}
