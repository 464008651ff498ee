//! Ecosystem adapters: one uniform contract, per-registry policies.
//!
//! Shared scoring helpers are free functions parameterized by the
//! adapter's [`ScoringPolicy`] record; the per-ecosystem modules supply
//! the tier cutoffs and the registry plumbing.

pub mod github;
pub mod gomod;
pub mod pypi;
pub mod rubygems;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;

use crate::error::Result;
use crate::services::Services;
use crate::types::{Anomaly, Ecosystem, PackageData, SourceRepo, TrustBreakdownEntry};

use self::github::RepoFacts;

/// A well-known package from the ecosystem's popularity ranking. The
/// download figure is the comparison baseline for adoption-ratio checks;
/// ecosystems without download counts carry 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularPackage {
    pub name: String,
    pub downloads: u64,
}

impl PopularPackage {
    #[must_use]
    pub fn new(name: &str, downloads: u64) -> Self {
        Self {
            name: name.to_string(),
            downloads,
        }
    }
}

/// Tier ladder: `(threshold, points)`, descending; the first threshold the
/// value meets (`>=`) wins.
pub type Tiers = &'static [(u64, i32)];

/// Tunable scoring cutoffs for one ecosystem.
pub struct ScoringPolicy {
    /// Days since oldest release.
    pub age_tiers: Tiers,
    /// Published version count.
    pub version_tiers: Tiers,
    /// Registry download totals.
    pub download_tiers: Tiers,
    /// Reverse-dependency counts.
    pub dependent_tiers: Tiers,
    /// Source-host stars.
    pub star_tiers: Tiers,
    /// Bonus when the repository belongs to an organization.
    pub org_bonus: i32,
}

/// First tier the value meets, descending.
#[must_use]
pub fn tier_points(value: u64, tiers: Tiers) -> i32 {
    tiers
        .iter()
        .find(|(threshold, _)| value >= *threshold)
        .map_or(0, |(_, points)| *points)
}

/// Age signal from the oldest release timestamp.
#[must_use]
pub fn score_age(
    data: &PackageData,
    policy: &ScoringPolicy,
    now: Timestamp,
) -> Option<TrustBreakdownEntry> {
    let oldest = data.oldest_release()?;
    let age_days = (now.as_second() - oldest.as_second()) / 86_400;
    if age_days < 0 {
        return None;
    }
    let points = tier_points(age_days as u64, policy.age_tiers);
    (points > 0).then(|| {
        TrustBreakdownEntry::new(
            "package_age",
            points,
            format!("oldest release {age_days} days ago"),
        )
    })
}

/// Version-count signal.
#[must_use]
pub fn score_version_count(
    data: &PackageData,
    policy: &ScoringPolicy,
) -> Option<TrustBreakdownEntry> {
    let count = data.versions.len() as u64;
    let points = tier_points(count, policy.version_tiers);
    (points > 0).then(|| {
        TrustBreakdownEntry::new("version_count", points, format!("{count} published versions"))
    })
}

/// Download-tier signal, for registries that report totals.
#[must_use]
pub fn score_downloads(data: &PackageData, policy: &ScoringPolicy) -> Option<TrustBreakdownEntry> {
    let downloads = data.downloads?;
    let points = tier_points(downloads, policy.download_tiers);
    (points > 0).then(|| {
        TrustBreakdownEntry::new("downloads", points, format!("{downloads} total downloads"))
    })
}

/// Points for a reverse-dependency count, on the adapter's ladder.
#[must_use]
pub fn dependents_points(count: u64, policy: &ScoringPolicy) -> i32 {
    tier_points(count, policy.dependent_tiers)
}

/// Source-host signals: star ladder plus organization ownership.
#[must_use]
pub fn source_repo_entries(facts: &RepoFacts, policy: &ScoringPolicy) -> Vec<TrustBreakdownEntry> {
    let mut entries = Vec::new();
    let star_points = tier_points(facts.stars, policy.star_tiers);
    if star_points > 0 {
        entries.push(TrustBreakdownEntry::new(
            "source_repo_stars",
            star_points,
            format!("{} repository stars", facts.stars),
        ));
    }
    if facts.org_owned && policy.org_bonus > 0 {
        entries.push(TrustBreakdownEntry::new(
            "source_repo_owner",
            policy.org_bonus,
            "repository owned by an organization",
        ));
    }
    entries
}

/// Pull `owner/repo` out of a code-host URL in package metadata.
#[must_use]
pub fn parse_github_url(url: &str) -> Option<SourceRepo> {
    let rest = url.split("github.com/").nth(1)?;
    let mut segments = rest.split('/');
    let owner = segments.next()?.trim();
    let repo = segments
        .next()?
        .trim()
        .trim_end_matches(".git")
        .split(['?', '#'])
        .next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(SourceRepo {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

/// Uniform contract every supported registry implements.
///
/// `fetch_metadata` is the canonical existence probe: absence means the
/// package does not exist in this ecosystem. `calculate_trust` scores only
/// what the fetched metadata already contains; the scorer adds the costlier
/// stages lazily.
#[async_trait]
pub trait EcosystemAdapter: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    fn policy(&self) -> &ScoringPolicy;

    /// Registry-canonical spelling of a name before lookup.
    fn normalize_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Fetch and normalize package metadata plus its version list.
    async fn fetch_metadata(&self, name: &str) -> Result<Option<PackageData>>;

    /// Basic-signal scoring from already-fetched metadata. No network.
    fn calculate_trust(&self, name: &str, data: &PackageData) -> Vec<TrustBreakdownEntry>;

    /// Reverse-dependency count, where the registry has such an API.
    async fn fetch_dependents_count(&self, name: &str) -> Result<Option<u64>>;

    /// Resolve the source-host repository; may consult vanity domains.
    async fn resolve_source_repo(
        &self,
        name: &str,
        data: &PackageData,
    ) -> Result<Option<SourceRepo>>;

    /// The ecosystem's top-package list, fetched once per run, long-TTL
    /// cached. Consumed by the name-similarity detectors.
    async fn popular_packages(&self) -> Result<Arc<Vec<PopularPackage>>>;

    /// Ecosystem-specific pattern checks. The popular list is passed in
    /// explicitly; detectors never refetch it.
    async fn detect_anomalies(
        &self,
        name: &str,
        data: &PackageData,
        popular: &[PopularPackage],
    ) -> Result<Vec<Anomaly>>;
}

/// Adapter factory: ecosystem tag to adapter instance.
#[must_use]
pub fn adapter_for(ecosystem: Ecosystem, services: &Services) -> Arc<dyn EcosystemAdapter> {
    match ecosystem {
        Ecosystem::Ruby => Arc::new(rubygems::RubyGemsAdapter::new(services.clone())),
        Ecosystem::Python => Arc::new(pypi::PyPiAdapter::new(services.clone())),
        Ecosystem::GoModule => Arc::new(gomod::GoModuleAdapter::new(services.clone())),
    }
}

/// All supported adapters, keyed by ecosystem.
#[must_use]
pub fn default_adapters(services: &Services) -> HashMap<Ecosystem, Arc<dyn EcosystemAdapter>> {
    [Ecosystem::Ruby, Ecosystem::Python, Ecosystem::GoModule]
        .into_iter()
        .map(|eco| (eco, adapter_for(eco, services)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::VersionRecord;

    const POLICY: ScoringPolicy = ScoringPolicy {
        age_tiers: &[(730, 15), (365, 10), (180, 5)],
        version_tiers: &[(21, 10), (11, 7), (6, 3)],
        download_tiers: &[(100_000_000, 30), (10_000_000, 20), (1_000_000, 10), (100_000, 5)],
        dependent_tiers: &[(1001, 10), (101, 7), (11, 3)],
        star_tiers: &[(10_000, 10), (1_000, 7), (100, 4), (10, 2)],
        org_bonus: 5,
    };

    fn versions_ago(now: Timestamp, days: &[i64]) -> Vec<VersionRecord> {
        days.iter()
            .map(|d| VersionRecord {
                version: format!("0.0.{d}"),
                created_at: Some(
                    Timestamp::from_second(now.as_second() - d * 86_400).unwrap(),
                ),
                yanked: false,
            })
            .collect()
    }

    #[test]
    fn test_tier_points_descending_ladder() {
        assert_eq!(tier_points(150_000_000, POLICY.download_tiers), 30);
        assert_eq!(tier_points(100_000_000, POLICY.download_tiers), 30);
        assert_eq!(tier_points(99_999_999, POLICY.download_tiers), 20);
        assert_eq!(tier_points(2_000_000, POLICY.download_tiers), 10);
        assert_eq!(tier_points(100_000, POLICY.download_tiers), 5);
        assert_eq!(tier_points(99_999, POLICY.download_tiers), 0);
    }

    #[test]
    fn test_score_age_tiers() {
        let now = Timestamp::now();
        let data = PackageData {
            versions: versions_ago(now, &[800, 10]),
            ..PackageData::default()
        };
        let entry = score_age(&data, &POLICY, now).unwrap();
        assert_eq!(entry.signal, "package_age");
        assert_eq!(entry.points, 15);

        let young = PackageData {
            versions: versions_ago(now, &[100]),
            ..PackageData::default()
        };
        assert!(score_age(&young, &POLICY, now).is_none());
    }

    #[test]
    fn test_score_age_without_timestamps() {
        let data = PackageData {
            versions: vec![VersionRecord {
                version: "1.0.0".into(),
                created_at: None,
                yanked: false,
            }],
            ..PackageData::default()
        };
        assert!(score_age(&data, &POLICY, Timestamp::now()).is_none());
    }

    #[test]
    fn test_score_version_count_boundaries() {
        let now = Timestamp::now();
        let data = PackageData {
            versions: versions_ago(now, &[1, 2, 3, 4, 5, 6]),
            ..PackageData::default()
        };
        let entry = score_version_count(&data, &POLICY).unwrap();
        assert_eq!(entry.points, 3);

        let five = PackageData {
            versions: versions_ago(now, &[1, 2, 3, 4, 5]),
            ..PackageData::default()
        };
        assert!(score_version_count(&five, &POLICY).is_none());
    }

    #[test]
    fn test_score_downloads_absent() {
        let data = PackageData::default();
        assert!(score_downloads(&data, &POLICY).is_none());
    }

    #[test]
    fn test_source_repo_entries() {
        let facts = RepoFacts {
            stars: 55_000,
            org_owned: true,
        };
        let entries = source_repo_entries(&facts, &POLICY);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].signal, "source_repo_stars");
        assert_eq!(entries[0].points, 10);
        assert_eq!(entries[1].signal, "source_repo_owner");
        assert_eq!(entries[1].points, 5);

        let personal = RepoFacts {
            stars: 3,
            org_owned: false,
        };
        assert!(source_repo_entries(&personal, &POLICY).is_empty());
    }

    #[test]
    fn test_parse_github_url_variants() {
        let expected = SourceRepo {
            owner: "rails".into(),
            repo: "rails".into(),
        };
        assert_eq!(
            parse_github_url("https://github.com/rails/rails"),
            Some(expected.clone())
        );
        assert_eq!(
            parse_github_url("https://github.com/rails/rails.git"),
            Some(expected.clone())
        );
        assert_eq!(
            parse_github_url("https://github.com/rails/rails/tree/main"),
            Some(expected)
        );
        assert_eq!(parse_github_url("https://example.com/rails"), None);
        assert_eq!(parse_github_url("https://github.com/only-owner"), None);
    }
}
