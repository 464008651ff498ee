//! Source-host repository facts.
//!
//! One small client for the code-hosting API: stars and owner type, cached
//! long-TTL. Quota exhaustion propagates as the fatal scan-abort condition
//! rather than degrading to absence.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::cache::{Cache, TTL_LONG};
use crate::error::Result;
use crate::http::HttpFetcher;
use crate::types::SourceRepo;

const API_BASE: &str = "https://api.github.com";

/// The two facts source-host scoring consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoFacts {
    pub stars: u64,
    pub org_owned: bool,
}

pub struct GithubClient {
    http: Arc<HttpFetcher>,
    cache: Arc<Cache>,
    ttl: Duration,
}

impl GithubClient {
    #[must_use]
    pub fn new(http: Arc<HttpFetcher>, cache: Arc<Cache>) -> Self {
        Self {
            http,
            cache,
            ttl: TTL_LONG,
        }
    }

    /// Stars and owner type for `owner/repo`; `None` when the repository
    /// does not exist or the signal is unavailable.
    pub async fn repo_facts(&self, repo: &SourceRepo) -> Result<Option<RepoFacts>> {
        let key = format!("repo:github:{}/{}", repo.owner, repo.repo);
        let url = format!("{API_BASE}/repos/{}/{}", repo.owner, repo.repo);

        let http = Arc::clone(&self.http);
        let fetched = self
            .cache
            .fetch(&key, self.ttl, || async move {
                let Some(raw) = http.get_json(&url).await? else {
                    return Ok(None);
                };
                Ok(Some(condense(&raw)))
            })
            .await?;

        Ok(fetched.as_ref().map(parse_facts))
    }
}

/// Keep only the fields scoring needs; the full repo document is large.
fn condense(raw: &Value) -> Value {
    json!({
        "stars": raw.get("stargazers_count").and_then(Value::as_u64).unwrap_or(0),
        "org": raw
            .pointer("/owner/type")
            .and_then(Value::as_str)
            .is_some_and(|t| t.eq_ignore_ascii_case("organization")),
    })
}

fn parse_facts(value: &Value) -> RepoFacts {
    RepoFacts {
        stars: value.get("stars").and_then(Value::as_u64).unwrap_or(0),
        org_owned: value.get("org").and_then(Value::as_bool).unwrap_or(false),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_condense_extracts_scoring_fields() {
        let raw = json!({
            "stargazers_count": 55973,
            "forks_count": 21000,
            "owner": {"login": "rails", "type": "Organization"},
            "description": "Ruby on Rails"
        });
        let condensed = condense(&raw);
        assert_eq!(condensed, json!({"stars": 55973, "org": true}));
    }

    #[test]
    fn test_condense_user_owned() {
        let raw = json!({
            "stargazers_count": 12,
            "owner": {"login": "someone", "type": "User"}
        });
        assert_eq!(condense(&raw), json!({"stars": 12, "org": false}));
    }

    #[test]
    fn test_condense_missing_fields() {
        assert_eq!(condense(&json!({})), json!({"stars": 0, "org": false}));
    }

    #[test]
    fn test_parse_facts_roundtrip() {
        let facts = parse_facts(&json!({"stars": 321, "org": true}));
        assert_eq!(
            facts,
            RepoFacts {
                stars: 321,
                org_owned: true
            }
        );
    }
}
