//! Rate-limited JSON-over-HTTPS fetcher for registry and metadata APIs.
//!
//! Centralizes reqwest client configuration, a process-wide token bucket,
//! and the retry/backoff policy. Callers receive `Ok(None)` for every
//! recoverable failure; absence means "signal unavailable", never an error.
//! The single non-recoverable condition is an exhausted source-host quota,
//! surfaced as [`ScanError::SourceHostRateLimit`].

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts per logical call, counting retried 429s and backoffs.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_millis(500);
const BUCKET_POLL: Duration = Duration::from_millis(20);
/// `Retry-After` values beyond this are not worth sleeping through.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Host prefix that gets Bearer credentials and fatal-quota handling.
const SOURCE_HOST_API: &str = "https://api.github.com/";

/// Build HTTP client with standard configuration.
///
/// Building can only fail with TLS backend issues; without a working
/// client the scanner cannot do anything, so panicking early is correct.
#[allow(clippy::expect_used)]
fn build_client() -> Client {
    Client::builder()
        .user_agent(concat!("pkgtrust/", env!("CARGO_PKG_VERSION")))
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
        .expect("Failed to build HTTP client - check TLS configuration")
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every request in the process. Refill is computed
/// from the wall-clock delta on each acquire; empty buckets poll in short
/// intervals until a token is available.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate: f64,
    capacity: f64,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate: f64, capacity: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
            rate,
            capacity: f64::from(capacity),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn acquire(&self) {
        while !self.try_acquire() {
            tokio::time::sleep(BUCKET_POLL).await;
        }
    }
}

/// What the retry loop should do with one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Success,
    Absent,
    RetryAfter(Duration),
    Backoff,
    FatalRateLimit,
}

fn classify_response(
    status: StatusCode,
    ratelimit_remaining: Option<&str>,
    retry_after: Option<Duration>,
) -> Disposition {
    if status.is_success() {
        return Disposition::Success;
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Disposition::Absent,
        StatusCode::TOO_MANY_REQUESTS => match retry_after {
            Some(wait) if wait <= MAX_RETRY_AFTER => Disposition::RetryAfter(wait),
            _ => Disposition::Absent,
        },
        StatusCode::FORBIDDEN => {
            // Code-hosting APIs signal quota exhaustion as 403 with a
            // zeroed remaining-quota header.
            if ratelimit_remaining == Some("0") {
                Disposition::FatalRateLimit
            } else {
                Disposition::Absent
            }
        }
        s if s.is_server_error() => Disposition::Backoff,
        _ => Disposition::Absent,
    }
}

/// Parse `Retry-After` as delta-seconds or HTTP-date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = httpdate::parse_http_date(raw).ok()?;
    date.duration_since(std::time::SystemTime::now()).ok()
}

/// Shared fetcher; one instance owned by the top-level scan entry.
pub struct HttpFetcher {
    client: Client,
    bucket: TokenBucket,
    github_token: Option<String>,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            client: build_client(),
            bucket: TokenBucket::new(config.requests_per_second, config.burst),
            github_token: config.github_token.clone(),
        }
    }

    /// GET a JSON document. `Ok(None)` covers not-found, malformed
    /// payloads, and exhausted retries alike.
    pub async fn get_json(&self, url: &str) -> Result<Option<Value>> {
        let Some(response) = self.execute(url).await? else {
            return Ok(None);
        };
        match response.json::<Value>().await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::debug!(url, error = %e, "malformed JSON payload, treating as absent");
                Ok(None)
            }
        }
    }

    /// GET a text document (vanity-domain HTML, proxy version lists).
    pub async fn get_text(&self, url: &str) -> Result<Option<String>> {
        let Some(response) = self.execute(url).await? else {
            return Ok(None);
        };
        match response.text().await {
            Ok(body) => Ok(Some(body)),
            Err(e) => {
                tracing::debug!(url, error = %e, "failed to read body, treating as absent");
                Ok(None)
            }
        }
    }

    fn auth_for(&self, url: &str) -> Option<&str> {
        if url.starts_with(SOURCE_HOST_API) {
            self.github_token.as_deref()
        } else {
            None
        }
    }

    async fn execute(&self, url: &str) -> Result<Option<Response>> {
        for attempt in 1..=MAX_ATTEMPTS {
            self.bucket.acquire().await;

            let mut request = self.client.get(url);
            if let Some(token) = self.auth_for(url) {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    // Timeouts and resets share the 5xx backoff policy.
                    if attempt == MAX_ATTEMPTS {
                        tracing::debug!(url, error = %e, "transport error, retries exhausted");
                        return Ok(None);
                    }
                    tracing::warn!(url, attempt, error = %e, "transport error, backing off");
                    tokio::time::sleep(BACKOFF_STEP * attempt).await;
                    continue;
                }
            };

            let remaining = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let retry_after = parse_retry_after(response.headers());
            let status = response.status();

            match classify_response(status, remaining.as_deref(), retry_after) {
                Disposition::Success => return Ok(Some(response)),
                Disposition::Absent => return Ok(None),
                Disposition::FatalRateLimit => {
                    tracing::error!(url, "source-host quota exhausted");
                    return Err(ScanError::SourceHostRateLimit);
                }
                Disposition::RetryAfter(wait) => {
                    if attempt == MAX_ATTEMPTS {
                        return Ok(None);
                    }
                    tracing::warn!(url, wait_secs = wait.as_secs(), "rate limited, honoring Retry-After");
                    tokio::time::sleep(wait).await;
                }
                Disposition::Backoff => {
                    if attempt == MAX_ATTEMPTS {
                        tracing::debug!(url, %status, "server error, retries exhausted");
                        return Ok(None);
                    }
                    tracing::warn!(url, %status, attempt, "server error, backing off");
                    tokio::time::sleep(BACKOFF_STEP * attempt).await;
                }
            }
        }
        Ok(None)
    }
}
