//! Shared service handles threaded through constructors.

use std::sync::Arc;

use crate::cache::Cache;
use crate::config::ScanConfig;
use crate::error::Result;
use crate::http::HttpFetcher;
use crate::registry::github::GithubClient;

/// The fetcher, cache, and source-host client every component depends on.
/// One instance per scan entry point; no global mutable state. The token
/// bucket lives inside the single [`HttpFetcher`].
#[derive(Clone)]
pub struct Services {
    pub http: Arc<HttpFetcher>,
    pub cache: Arc<Cache>,
    pub github: Arc<GithubClient>,
}

impl Services {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(config));
        let cache = Arc::new(Cache::new(config.cache_root())?);
        let github = Arc::new(GithubClient::new(Arc::clone(&http), Arc::clone(&cache)));
        Ok(Self { http, cache, github })
    }
}
