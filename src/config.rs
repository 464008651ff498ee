//! Scan configuration, populated from the environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Worker-pool bounds; each worker evaluates one package at a time.
const MIN_WORKERS: usize = 3;
const MAX_WORKERS: usize = 10;

/// Scanner settings. Every field has a sensible default so embedders can
/// start from `ScanConfig::from_env()` and override selectively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Concurrent package evaluations.
    pub workers: usize,

    /// Token-bucket refill rate, requests per second, shared process-wide.
    pub requests_per_second: f64,

    /// Token-bucket capacity (burst allowance).
    pub burst: u32,

    /// Cache root override; defaults to the home-scoped cache directory.
    pub cache_dir: Option<PathBuf>,

    /// Bearer token for the source-host API; raises the anonymous limit.
    #[serde(skip_serializing)]
    pub github_token: Option<String>,

    /// Verbose logging toggle.
    pub debug: bool,

    /// Emit per-stage timing at `target: "profile"`.
    pub profile: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(MIN_WORKERS)
            .clamp(MIN_WORKERS, MAX_WORKERS);

        Self {
            workers,
            requests_per_second: 10.0,
            burst: 25,
            cache_dir: None,
            github_token: None,
            debug: false,
            profile: false,
        }
    }
}

impl ScanConfig {
    /// Defaults plus the recognized environment variables:
    /// `GITHUB_TOKEN`, `PKGTRUST_DEBUG`, `PKGTRUST_PROFILE`,
    /// `PKGTRUST_CACHE_DIR`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            github_token: std::env::var("GITHUB_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            debug: env_flag("PKGTRUST_DEBUG"),
            profile: env_flag("PKGTRUST_PROFILE"),
            cache_dir: std::env::var_os("PKGTRUST_CACHE_DIR").map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Resolved cache root.
    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(crate::paths::cache_dir)
    }
}

fn env_flag(var: &str) -> bool {
    matches!(
        std::env::var(var).as_deref(),
        Ok("1" | "true" | "TRUE" | "yes")
    )
}
