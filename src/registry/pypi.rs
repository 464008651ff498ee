//! PyPI adapter.
//!
//! The project JSON carries versions and rich trove classifiers but no
//! download totals and no dependents API, so age and version weights are
//! raised and classifier signals fill the gap.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::anomaly;
use crate::cache::{TTL_SHORT, cache_key};
use crate::error::Result;
use crate::services::Services;
use crate::types::{
    Anomaly, Ecosystem, PackageData, SourceRepo, TrustBreakdownEntry, VersionRecord,
};

use super::{
    EcosystemAdapter, PopularPackage, ScoringPolicy, parse_github_url, score_age,
    score_version_count,
};

const API_BASE: &str = "https://pypi.org/pypi";

/// Age max 25 and versions max 20 (raised to compensate for the missing
/// download signal); maturity/license/interpreter classifier bonuses;
/// source host max 15.
static POLICY: ScoringPolicy = ScoringPolicy {
    age_tiers: &[(730, 25), (365, 15), (180, 8)],
    version_tiers: &[(21, 20), (11, 12), (6, 6)],
    download_tiers: &[],
    dependent_tiers: &[],
    star_tiers: &[(10_000, 10), (1_000, 7), (100, 4), (10, 2)],
    org_bonus: 5,
};

/// Top projects; PyPI reports no download totals, so the baseline is 0 and
/// the similarity detectors treat matches as unadopted by default.
static POPULAR_SEED: &[&str] = &[
    "requests",
    "numpy",
    "pandas",
    "django",
    "flask",
    "pytest",
    "setuptools",
    "urllib3",
    "boto3",
    "pip",
    "sqlalchemy",
    "celery",
    "scipy",
    "torch",
    "tensorflow",
    "fastapi",
];

/// Framework brands that attract namespace squats in a registry without
/// download counts.
static MAGNET_NAMESPACES: &[&str] = &[
    "django", "flask", "requests", "numpy", "pandas", "pytest", "tensorflow", "torch", "airflow",
    "fastapi", "aws",
];

pub struct PyPiAdapter {
    services: Services,
    popular: OnceCell<Arc<Vec<PopularPackage>>>,
}

impl PyPiAdapter {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services,
            popular: OnceCell::new(),
        }
    }
}

fn classifier_maturity(classifiers: &[String]) -> Option<TrustBreakdownEntry> {
    let status = classifiers
        .iter()
        .find(|c| c.starts_with("Development Status ::"))?;
    let (points, label) = if status.contains("Production/Stable") || status.contains("Mature") {
        (10, "production/stable")
    } else if status.contains("Beta") {
        (5, "beta")
    } else if status.contains("Alpha") {
        (2, "alpha")
    } else {
        // Planning / Pre-Alpha / Inactive
        (0, "inactive")
    };
    (points > 0).then(|| {
        TrustBreakdownEntry::new("maturity", points, format!("development status: {label}"))
    })
}

fn parse_project(doc: &Value) -> PackageData {
    let info = doc.get("info");

    let classifiers: Vec<String> = info
        .and_then(|i| i.get("classifiers"))
        .and_then(Value::as_array)
        .map(|cs| {
            cs.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let license = info
        .and_then(|i| i.get("license"))
        .and_then(Value::as_str)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            classifiers
                .iter()
                .find(|c| c.starts_with("License ::"))
                .cloned()
        });

    let author = info
        .and_then(|i| i.get("author"))
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            info.and_then(|i| i.get("author_email"))
                .and_then(Value::as_str)
                .filter(|a| !a.is_empty())
                .map(str::to_owned)
        });

    // project_urls is a free-form map; take the first code-host link.
    let repository_url = info
        .and_then(|i| i.get("project_urls"))
        .and_then(Value::as_object)
        .and_then(|urls| {
            urls.values()
                .filter_map(Value::as_str)
                .find(|u| u.contains("github.com/"))
                .map(str::to_owned)
        });

    let homepage_url = info
        .and_then(|i| i.get("home_page"))
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_owned);

    let versions = doc
        .get("releases")
        .and_then(Value::as_object)
        .map(|releases| {
            releases
                .iter()
                .map(|(version, files)| {
                    let files = files.as_array();
                    let created_at = files
                        .into_iter()
                        .flatten()
                        .filter_map(|f| f.get("upload_time_iso_8601"))
                        .filter_map(Value::as_str)
                        .filter_map(|ts| ts.parse::<Timestamp>().ok())
                        .min();
                    let yanked = files.is_some_and(|fs| {
                        !fs.is_empty()
                            && fs
                                .iter()
                                .all(|f| f.get("yanked").and_then(Value::as_bool) == Some(true))
                    });
                    VersionRecord {
                        version: version.clone(),
                        created_at,
                        yanked,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    PackageData {
        author,
        license,
        classifiers,
        repository_url,
        homepage_url,
        versions,
        ..PackageData::default()
    }
}

#[async_trait]
impl EcosystemAdapter for PyPiAdapter {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Python
    }

    fn policy(&self) -> &ScoringPolicy {
        &POLICY
    }

    /// Lowercase with `_` canonicalized to `-` before registry lookup.
    fn normalize_name(&self, name: &str) -> String {
        name.to_lowercase().replace('_', "-")
    }

    async fn fetch_metadata(&self, name: &str) -> Result<Option<PackageData>> {
        let key = cache_key("meta", "python", name);
        let url = format!("{API_BASE}/{name}/json");
        let http = Arc::clone(&self.services.http);
        let doc = self
            .services
            .cache
            .fetch(&key, TTL_SHORT, || async move { http.get_json(&url).await })
            .await?;
        Ok(doc.as_ref().map(parse_project))
    }

    fn calculate_trust(&self, _name: &str, data: &PackageData) -> Vec<TrustBreakdownEntry> {
        let now = Timestamp::now();
        let mut entries: Vec<TrustBreakdownEntry> = [
            score_age(data, &POLICY, now),
            score_version_count(data, &POLICY),
            classifier_maturity(&data.classifiers),
        ]
        .into_iter()
        .flatten()
        .collect();

        if data.license.is_some() {
            entries.push(TrustBreakdownEntry::new(
                "license",
                5,
                "license declared",
            ));
        }
        if data
            .classifiers
            .iter()
            .any(|c| c.starts_with("Programming Language :: Python :: 3"))
        {
            entries.push(TrustBreakdownEntry::new(
                "python3_support",
                5,
                "declares Python 3 support",
            ));
        }
        entries
    }

    /// PyPI has no dependents API.
    async fn fetch_dependents_count(&self, _name: &str) -> Result<Option<u64>> {
        Ok(None)
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
        findings.extend(anomaly::namespace::detect_magnet_namespace(
            name,
            MAGNET_NAMESPACES,
        ));
        findings.extend(anomaly::growth::detect_version_spike(&data.versions, now));
        findings.extend(anomaly::growth::detect_new_package(&data.versions, now));
        findings.extend(anomaly::growth::detect_rapid_versioning(
            &data.versions,
            now,
        ));
        findings.extend(anomaly::ownership::detect_ownership_change(
            &self.services.cache,
            Ecosystem::Python,
            name,
            data.author.as_deref(),
            data.downloads,
        ));

        Ok(findings)
    }
}
