//! RubyGems adapter.
//!
//! The registry reports download totals, reverse dependencies, and version
//! timestamps, so the basic-signal stage usually decides on its own.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::anomaly;
use crate::cache::{TTL_LONG, TTL_SHORT, cache_key};
use crate::error::Result;
use crate::services::Services;
use crate::types::{
    Anomaly, Ecosystem, PackageData, SourceRepo, TrustBreakdownEntry, VersionRecord,
};

use super::{
    EcosystemAdapter, PopularPackage, ScoringPolicy, parse_github_url, score_age, score_downloads,
    score_version_count,
};

const API_BASE: &str = "https://rubygems.org/api/v1";

/// Downloads max 30, age max 15, versions max 10, dependents max 10,
/// source host max 15.
static POLICY: ScoringPolicy = ScoringPolicy {
    age_tiers: &[(730, 15), (365, 10), (180, 5)],
    version_tiers: &[(21, 10), (11, 7), (6, 3)],
    download_tiers: &[
        (100_000_000, 30),
        (10_000_000, 20),
        (1_000_000, 10),
        (100_000, 5),
    ],
    dependent_tiers: &[(1001, 10), (101, 7), (11, 3)],
    star_tiers: &[(10_000, 10), (1_000, 7), (100, 4), (10, 2)],
    org_bonus: 5,
};

/// Well-known gems with approximate lifetime downloads; the adoption
/// baseline for the name-similarity and namespace detectors.
static POPULAR_SEED: &[(&str, u64)] = &[
    ("rake", 1_100_000_000),
    ("bundler", 1_000_000_000),
    ("json", 950_000_000),
    ("activesupport", 800_000_000),
    ("thor", 750_000_000),
    ("rack", 700_000_000),
    ("rails", 550_000_000),
    ("nokogiri", 500_000_000),
    ("rspec", 400_000_000),
    ("pry", 300_000_000),
    ("puma", 280_000_000),
    ("sidekiq", 220_000_000),
    ("sinatra", 180_000_000),
    ("devise", 160_000_000),
    ("faraday", 350_000_000),
    ("redis", 300_000_000),
];

pub struct RubyGemsAdapter {
    services: Services,
    popular: OnceCell<Arc<Vec<PopularPackage>>>,
}

impl RubyGemsAdapter {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services,
            popular: OnceCell::new(),
        }
    }

    async fn gem_document(&self, name: &str) -> Result<Option<Value>> {
        let key = cache_key("meta", "ruby", name);
        let url = format!("{API_BASE}/gems/{name}.json");
        let http = Arc::clone(&self.services.http);
        self.services
            .cache
            .fetch(&key, TTL_SHORT, || async move { http.get_json(&url).await })
            .await
    }

    async fn versions_document(&self, name: &str) -> Result<Option<Value>> {
        let key = cache_key("versions", "ruby", name);
        let url = format!("{API_BASE}/versions/{name}.json");
        let http = Arc::clone(&self.services.http);
        self.services
            .cache
            .fetch(&key, TTL_LONG, || async move { http.get_json(&url).await })
            .await
    }
}

fn parse_gem(doc: &Value) -> PackageData {
    PackageData {
        downloads: doc.get("downloads").and_then(Value::as_u64),
        author: doc
            .get("authors")
            .and_then(Value::as_str)
            .map(str::to_owned),
        license: doc
            .get("licenses")
            .and_then(Value::as_array)
            .and_then(|l| l.first())
            .and_then(Value::as_str)
            .map(str::to_owned),
        repository_url: doc
            .get("source_code_uri")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
        homepage_url: doc
            .get("homepage_uri")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
        ..PackageData::default()
    }
}

fn parse_versions(doc: &Value) -> Vec<VersionRecord> {
    let Some(entries) = doc.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let version = entry.get("number")?.as_str()?.to_string();
            let created_at = entry
                .get("created_at")
                .and_then(Value::as_str)
                .and_then(|ts| ts.parse::<Timestamp>().ok());
            Some(VersionRecord {
                version,
                created_at,
                yanked: false,
            })
        })
        .collect()
}

#[async_trait]
impl EcosystemAdapter for RubyGemsAdapter {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Ruby
    }

    fn policy(&self) -> &ScoringPolicy {
        &POLICY
    }

    async fn fetch_metadata(&self, name: &str) -> Result<Option<PackageData>> {
        let Some(gem) = self.gem_document(name).await? else {
            return Ok(None);
        };
        let mut data = parse_gem(&gem);
        if let Some(versions) = self.versions_document(name).await? {
            data.versions = parse_versions(&versions);
        }
        Ok(Some(data))
    }

    fn calculate_trust(&self, _name: &str, data: &PackageData) -> Vec<TrustBreakdownEntry> {
        let now = Timestamp::now();
        [
            score_downloads(data, &POLICY),
            score_age(data, &POLICY, now),
            score_version_count(data, &POLICY),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    async fn fetch_dependents_count(&self, name: &str) -> Result<Option<u64>> {
        let key = cache_key("dependents", "ruby", name);
        let url = format!("{API_BASE}/gems/{name}/reverse_dependencies.json");
        let http = Arc::clone(&self.services.http);
        let fetched = self
            .services
            .cache
            .fetch(&key, TTL_LONG, || async move {
                let Some(doc) = http.get_json(&url).await? else {
                    return Ok(None);
                };
                let count = doc.as_array().map_or(0, Vec::len);
                Ok(Some(json!(count)))
            })
            .await?;
        Ok(fetched.and_then(|v| v.as_u64()))
    }

    async fn resolve_source_repo(
        &self,
        _name: &str,
        data: &PackageData,
    ) -> Result<Option<SourceRepo>> {
        Ok(data
            .repository_url
            .as_deref()
            .and_then(parse_github_url)
            .or_else(|| data.homepage_url.as_deref().and_then(parse_github_url)))
    }

    async fn popular_packages(&self) -> Result<Arc<Vec<PopularPackage>>> {
        let list = self
            .popular
            .get_or_init(|| async {
                Arc::new(
                    POPULAR_SEED
                        .iter()
                        .map(|(name, downloads)| PopularPackage::new(name, *downloads))
                        .collect(),
                )
            })
            .await;
        Ok(Arc::clone(list))
    }

    async fn detect_anomalies(
        &self,
        name: &str,
        data: &PackageData,
        popular: &[PopularPackage],
    ) -> Result<Vec<Anomaly>> {
        let now = Timestamp::now();
        let mut findings = Vec::new();

        findings.extend(anomaly::similarity::detect_typosquat(
            name,
            data.downloads,
            popular,
        ));
        findings.extend(anomaly::similarity::detect_homoglyph(name, popular));
        findings.extend(anomaly::namespace::detect_namespace_squat(
            name,
            data.downloads,
            popular,
        ));
        findings.extend(anomaly::growth::detect_download_inflation(
            data.downloads,
            &data.versions,
            now,
        ));
        findings.extend(anomaly::growth::detect_version_spike(&data.versions, now));
        findings.extend(anomaly::growth::detect_new_package(&data.versions, now));
        findings.extend(anomaly::growth::detect_rapid_versioning(
            &data.versions,
            now,
        ));
        findings.extend(anomaly::ownership::detect_ownership_change(
            &self.services.cache,
            Ecosystem::Ruby,
            name,
            data.author.as_deref(),
            data.downloads,
        ));

        Ok(findings)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rails_doc() -> Value {
        serde_json::from_str(
            r#"{
                "name": "rails",
                "downloads": 550123456,
                "version": "7.1.0",
                "authors": "David Heinemeier Hansson",
                "licenses": ["MIT"],
                "source_code_uri": "https://github.com/rails/rails/tree/v7.1.0",
                "homepage_uri": "https://rubyonrails.org"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_gem_fields() {
        let data = parse_gem(&rails_doc());
        assert_eq!(data.downloads, Some(550_123_456));
        assert_eq!(data.author.as_deref(), Some("David Heinemeier Hansson"));
        assert_eq!(data.license.as_deref(), Some("MIT"));
        assert!(data.repository_url.as_deref().unwrap().contains("github.com"));
    }

    #[test]
    fn test_parse_gem_sparse_doc() {
        let data = parse_gem(&json!({"name": "tiny"}));
        assert_eq!(data.downloads, None);
        assert_eq!(data.author, None);
        assert_eq!(data.license, None);
    }

    #[test]
    fn test_parse_versions() {
        let doc: Value = serde_json::from_str(
            r#"[
                {"number": "7.1.0", "created_at": "2023-10-05T18:52:02.000Z"},
                {"number": "7.0.0", "created_at": "2021-12-15T23:44:38.000Z"},
                {"number": "bad-entry"}
            ]"#,
        )
        .unwrap();
        let versions = parse_versions(&doc);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, "7.1.0");
        assert!(versions[0].created_at.is_some());
    }

    #[test]
    fn test_parse_versions_not_an_array() {
        assert!(parse_versions(&json!({"error": "borked"})).is_empty());
    }

    #[test]
    fn test_calculate_trust_popular_gem() {
        let (services, _dir) = crate::scan::test_support::test_services();
        let adapter = RubyGemsAdapter::new(services);

        let now = Timestamp::now();
        let old = Timestamp::from_second(now.as_second() - 3 * 365 * 86_400).unwrap();
        let mut data = parse_gem(&rails_doc());
        data.versions = (0..25)
            .map(|i| VersionRecord {
                version: format!("6.{i}.0"),
                created_at: Some(old),
                yanked: false,
            })
            .collect();

        let breakdown = adapter.calculate_trust("rails", &data);
        let total: i32 = breakdown.iter().map(|e| e.points).sum();
        // downloads 30 + age 15 + versions 10
        assert_eq!(total, 55);

        let signals: Vec<_> = breakdown.iter().map(|e| e.signal.as_str()).collect();
        assert!(signals.contains(&"downloads"));
        assert!(signals.contains(&"package_age"));
        assert!(signals.contains(&"version_count"));
    }

    #[test]
    fn test_dependents_ladder() {
        assert_eq!(super::super::dependents_points(5000, &POLICY), 10);
        assert_eq!(super::super::dependents_points(500, &POLICY), 7);
        assert_eq!(super::super::dependents_points(50, &POLICY), 3);
        assert_eq!(super::super::dependents_points(5, &POLICY), 0);
    }

    #[tokio::test]
    async fn test_popular_list_contains_baselines() {
        let (services, _dir) = crate::scan::test_support::test_services();
        let adapter = RubyGemsAdapter::new(services);
        let popular = adapter.popular_packages().await.unwrap();
        assert!(popular.iter().any(|p| p.name == "rails"));
        assert!(
            popular
                .iter()
                .all(|p| p.downloads >= 100_000_000)
        );
    }
}
