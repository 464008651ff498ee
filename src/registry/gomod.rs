//! Go module adapter.
//!
//! There is no central index: packages are addressed by host path. Facts
//! come from the deps.dev aggregator, the module proxy supplies a version
//! list fallback, and vanity domains are resolved through their
//! `?go-get=1` meta tags.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use jiff::Timestamp;
use regex::Regex;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::anomaly;
use crate::cache::{TTL_LONG, TTL_SHORT, cache_key};
use crate::error::Result;
use crate::services::Services;
use crate::types::{
    Anomaly, Ecosystem, PackageData, SourceRepo, TrustBreakdownEntry, VersionRecord,
};

use super::{EcosystemAdapter, PopularPackage, ScoringPolicy, parse_github_url, score_age, score_version_count};

const DEPS_DEV_BASE: &str = "https://api.deps.dev/v3";
const PROXY_BASE: &str = "https://proxy.golang.org";

/// Modules under these prefixes are the standard library or its vendored
/// extensions; they short-circuit to a fixed high score.
const STDLIB_VENDOR_PREFIX: &str = "golang.org/x/";

/// Scorecard max 20, source-host stars max 20 (no org bonus), age max 10,
/// versions max 5, license max 5, inverse dependency count max 5,
/// repo-quality max 5, advisory penalty to -30.
static POLICY: ScoringPolicy = ScoringPolicy {
    age_tiers: &[(730, 10), (365, 7), (180, 3)],
    version_tiers: &[(21, 5), (11, 3), (6, 1)],
    download_tiers: &[],
    dependent_tiers: &[],
    star_tiers: &[(10_000, 20), (5_000, 15), (1_000, 10), (100, 5)],
    org_bonus: 0,
};

/// Widely imported modules; the proxy publishes no download counts, so the
/// adoption baseline is 0.
static POPULAR_SEED: &[&str] = &[
    "github.com/gin-gonic/gin",
    "github.com/sirupsen/logrus",
    "github.com/spf13/cobra",
    "github.com/spf13/viper",
    "github.com/stretchr/testify",
    "github.com/gorilla/mux",
    "github.com/pkg/errors",
    "github.com/prometheus/client_golang",
    "github.com/go-chi/chi",
    "golang.org/x/crypto",
    "golang.org/x/net",
    "golang.org/x/sync",
    "google.golang.org/grpc",
    "k8s.io/client-go",
];

static GO_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"<meta\s+[^>]*name="go-import"[^>]*content="([^"]+)""#)
        .expect("valid go-import pattern")
});

/// True for stdlib packages (`fmt`, `net/http`) and vendored stdlib
/// modules (`golang.org/x/...`).
fn is_stdlib(module: &str) -> bool {
    if module.starts_with(STDLIB_VENDOR_PREFIX) {
        return true;
    }
    // A first path segment without a dot is not a hostname.
    module.split('/').next().is_some_and(|seg| !seg.contains('.'))
}

/// Percent-encode a module path for use as one URL path segment.
fn encode_module(module: &str) -> String {
    module.replace('/', "%2F")
}

/// Module-proxy case escaping: uppercase letters become `!` + lowercase.
fn escape_proxy_path(module: &str) -> String {
    let mut escaped = String::with_capacity(module.len());
    for c in module.chars() {
        if c.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(c.to_ascii_lowercase());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Parse the aggregator's package document into version records plus the
/// default (latest tagged) version.
fn parse_package_versions(doc: &Value) -> (Vec<VersionRecord>, Option<String>) {
    let mut default_version = None;
    let records = doc
        .get("versions")
        .and_then(Value::as_array)
        .map(|versions| {
            versions
                .iter()
                .filter_map(|entry| {
                    let version = entry
                        .pointer("/versionKey/version")?
                        .as_str()?
                        .to_string();
                    if entry.get("isDefault").and_then(Value::as_bool) == Some(true) {
                        default_version = Some(version.clone());
                    }
                    let created_at = entry
                        .get("publishedAt")
                        .and_then(Value::as_str)
                        .and_then(|ts| ts.parse::<Timestamp>().ok());
                    Some(VersionRecord {
                        version,
                        created_at,
                        yanked: false,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    (records, default_version)
}

/// Parse the `?go-get=1` meta tag: `content="prefix vcs repo-url"`.
fn parse_go_import(html: &str) -> Option<String> {
    let captures = GO_IMPORT_RE.captures(html)?;
    let content = captures.get(1)?.as_str();
    let mut fields = content.split_whitespace();
    let _prefix = fields.next()?;
    let _vcs = fields.next()?;
    fields.next().map(str::to_owned)
}

pub struct GoModuleAdapter {
    services: Services,
    popular: OnceCell<Arc<Vec<PopularPackage>>>,
}

impl GoModuleAdapter {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services,
            popular: OnceCell::new(),
        }
    }

    async fn package_document(&self, module: &str) -> Result<Option<Value>> {
        let key = cache_key("meta", "go", module);
        let url = format!(
            "{DEPS_DEV_BASE}/systems/GO/packages/{}",
            encode_module(module)
        );
        let http = Arc::clone(&self.services.http);
        self.services
            .cache
            .fetch(&key, TTL_SHORT, || async move { http.get_json(&url).await })
            .await
    }

    /// Version detail for the default version: license and advisory count.
    async fn version_document(&self, module: &str, version: &str) -> Result<Option<Value>> {
        let key = cache_key("vdetail", "go", module);
        let url = format!(
            "{DEPS_DEV_BASE}/systems/GO/packages/{}/versions/{version}",
            encode_module(module)
        );
        let http = Arc::clone(&self.services.http);
        self.services
            .cache
            .fetch(&key, TTL_LONG, || async move {
                let Some(doc) = http.get_json(&url).await? else {
                    return Ok(None);
                };
                Ok(Some(json!({
                    "license": doc
                        .get("licenses")
                        .and_then(Value::as_array)
                        .and_then(|l| l.first())
                        .and_then(Value::as_str),
                    "advisories": doc
                        .get("advisoryKeys")
                        .and_then(Value::as_array)
                        .map_or(0, Vec::len),
                })))
            })
            .await
    }

    async fn dependency_count(&self, module: &str, version: &str) -> Result<Option<u64>> {
        let key = cache_key("depcount", "go", module);
        let url = format!(
            "{DEPS_DEV_BASE}/systems/GO/packages/{}/versions/{version}:dependencies",
            encode_module(module)
        );
        let http = Arc::clone(&self.services.http);
        let fetched = self
            .services
            .cache
            .fetch(&key, TTL_LONG, || async move {
                let Some(doc) = http.get_json(&url).await? else {
                    return Ok(None);
                };
                // The root node is the package itself.
                let count = doc
                    .get("nodes")
                    .and_then(Value::as_array)
                    .map_or(0, |nodes| nodes.len().saturating_sub(1));
                Ok(Some(json!(count)))
            })
            .await?;
        Ok(fetched.and_then(|v| v.as_u64()))
    }

    /// Repository facts from the aggregator: scorecard and description.
    async fn project_document(&self, repo: &SourceRepo) -> Result<Option<Value>> {
        let id = format!("github.com/{}/{}", repo.owner, repo.repo);
        let key = cache_key("project", "go", &id);
        let url = format!("{DEPS_DEV_BASE}/projects/{}", encode_module(&id));
        let http = Arc::clone(&self.services.http);
        self.services
            .cache
            .fetch(&key, TTL_LONG, || async move {
                let Some(doc) = http.get_json(&url).await? else {
                    return Ok(None);
                };
                Ok(Some(json!({
                    "scorecard": doc.pointer("/scorecard/overallScore").and_then(Value::as_f64),
                    "described": doc
                        .get("description")
                        .and_then(Value::as_str)
                        .is_some_and(|d| !d.is_empty()),
                })))
            })
            .await
    }

    /// Version list fallback from the module proxy (no timestamps).
    async fn proxy_versions(&self, module: &str) -> Result<Vec<VersionRecord>> {
        let key = cache_key("proxylist", "go", module);
        let url = format!("{PROXY_BASE}/{}/@v/list", escape_proxy_path(module));
        let http = Arc::clone(&self.services.http);
        let fetched = self
            .services
            .cache
            .fetch(&key, TTL_LONG, || async move {
                let Some(body) = http.get_text(&url).await? else {
                    return Ok(None);
                };
                let versions: Vec<&str> = body.split_whitespace().collect();
                if versions.is_empty() {
                    return Ok(None);
                }
                Ok(Some(json!(versions)))
            })
            .await?;

        Ok(fetched
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(|version| VersionRecord {
                version: version.to_string(),
                created_at: None,
                yanked: false,
            })
            .collect())
    }

    /// Literal split for `github.com/...` paths; vanity domains answer a
    /// `?go-get=1` probe with a repo-import meta tag. Cached long-TTL.
    async fn repo_for_module(&self, module: &str) -> Result<Option<SourceRepo>> {
        if let Some(repo) = parse_github_url(module) {
            return Ok(Some(repo));
        }
        if is_stdlib(module) {
            return Ok(None);
        }

        let key = cache_key("vanity", "go", module);
        let url = format!("https://{module}?go-get=1");
        let http = Arc::clone(&self.services.http);
        let fetched = self
            .services
            .cache
            .fetch(&key, TTL_LONG, || async move {
                let Some(html) = http.get_text(&url).await? else {
                    return Ok(None);
                };
                let repo_url = parse_go_import(&html);
                Ok(Some(json!({ "repo_url": repo_url })))
            })
            .await?;

        Ok(fetched
            .as_ref()
            .and_then(|v| v.get("repo_url"))
            .and_then(Value::as_str)
            .and_then(parse_github_url))
    }
}

#[async_trait]
impl EcosystemAdapter for GoModuleAdapter {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::GoModule
    }

    fn policy(&self) -> &ScoringPolicy {
        &POLICY
    }

    async fn fetch_metadata(&self, name: &str) -> Result<Option<PackageData>> {
        if is_stdlib(name) {
            return Ok(Some(PackageData {
                stdlib: true,
                ..PackageData::default()
            }));
        }

        let mut data = match self.package_document(name).await? {
            Some(doc) => {
                let (versions, default_version) = parse_package_versions(&doc);
                let mut data = PackageData {
                    versions,
                    ..PackageData::default()
                };

                if let Some(version) = default_version
                    && let Some(detail) = self.version_document(name, &version).await?
                {
                    data.license = detail
                        .get("license")
                        .and_then(Value::as_str)
                        .map(str::to_owned);
                    data.advisory_count =
                        detail.get("advisories").and_then(Value::as_u64).unwrap_or(0) as u32;
                    data.dependency_count = self
                        .dependency_count(name, &version)
                        .await?
                        .map(|c| c as u32);
                }
                data
            }
            None => {
                // Aggregator misses some modules the proxy still serves.
                let versions = self.proxy_versions(name).await?;
                if versions.is_empty() {
                    return Ok(None);
                }
                PackageData {
                    versions,
                    ..PackageData::default()
                }
            }
        };

        if let Some(repo) = self.repo_for_module(name).await? {
            data.repository_url = Some(format!("https://github.com/{repo}"));
            if let Some(project) = self.project_document(&repo).await? {
                data.scorecard = project.get("scorecard").and_then(Value::as_f64);
                data.repo_quality = project
                    .get("described")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            }
        }

        Ok(Some(data))
    }

    fn calculate_trust(&self, _name: &str, data: &PackageData) -> Vec<TrustBreakdownEntry> {
        if data.stdlib {
            return vec![TrustBreakdownEntry::new(
                "standard_library",
                95,
                "standard library or vendored extension module",
            )];
        }

        let now = Timestamp::now();
        let mut entries: Vec<TrustBreakdownEntry> = [
            score_age(data, &POLICY, now),
            score_version_count(data, &POLICY),
        ]
        .into_iter()
        .flatten()
        .collect();

        if let Some(scorecard) = data.scorecard {
            // 0-10 assessment scaled onto 20 points.
            let points = ((scorecard * 2.0).round() as i32).clamp(0, 20);
            if points > 0 {
                entries.push(TrustBreakdownEntry::new(
                    "scorecard",
                    points,
                    format!("security scorecard {scorecard:.1}/10"),
                ));
            }
        }
        if data.license.is_some() {
            entries.push(TrustBreakdownEntry::new("license", 5, "license declared"));
        }
        if let Some(deps) = data.dependency_count {
            // Smaller dependency surface, slightly higher confidence.
            let points = match deps {
                0..=5 => 5,
                6..=20 => 3,
                21..=50 => 1,
                _ => 0,
            };
            if points > 0 {
                entries.push(TrustBreakdownEntry::new(
                    "dependency_count",
                    points,
                    format!("{deps} direct dependencies"),
                ));
            }
        }
        if data.repo_quality {
            entries.push(TrustBreakdownEntry::new(
                "repo_quality",
                5,
                "repository carries a description",
            ));
        }
        if data.advisory_count > 0 {
            let penalty = -(i32::try_from(data.advisory_count).unwrap_or(3).min(3) * 10);
            entries.push(TrustBreakdownEntry::new(
                "advisories",
                penalty,
                format!("{} known advisories", data.advisory_count),
            ));
        }
        entries
    }

    /// No reverse-dependency API for module paths.
    async fn fetch_dependents_count(&self, _name: &str) -> Result<Option<u64>> {
        Ok(None)
    }

    async fn resolve_source_repo(
        &self,
        name: &str,
        _data: &PackageData,
    ) -> Result<Option<SourceRepo>> {
        self.repo_for_module(name).await
    }

    async fn popular_packages(&self) -> Result<Arc<Vec<PopularPackage>>> {
        let list = self
            .popular
            .get_or_init(|| async {
                Arc::new(
                    POPULAR_SEED
                        .iter()
                        .map(|name| PopularPackage::new(name, 0))
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
        findings.extend(anomaly::gopatterns::detect_name_pattern(name));
        findings.extend(anomaly::growth::detect_version_spike(&data.versions, now));
        findings.extend(anomaly::growth::detect_new_package(&data.versions, now));
        findings.extend(anomaly::growth::detect_rapid_versioning(
            &data.versions,
            now,
        ));

        Ok(findings)
    }
}
