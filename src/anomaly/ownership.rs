//! Ownership-change detection, stateful across scans.
//!
//! The detector keys the cache on the package, compares the recorded
//! maintainer identity with the current one, then records the current
//! identity for the next scan. It is the one detector that writes shared
//! state, and the cache dependency is explicit in its signature.

use serde_json::json;

use crate::cache::{Cache, TTL_OWNERSHIP};
use crate::types::{Anomaly, AnomalyKind, AnomalySeverity, Ecosystem};

/// A maintainer handover on a package this widely used is the takeover
/// scenario this tool exists for; penalty scales with reach.
fn severity_for_reach(downloads: u64) -> (AnomalySeverity, i32, &'static str) {
    if downloads >= 100_000_000 {
        (AnomalySeverity::High, -40, "critical-reach")
    } else if downloads >= 10_000_000 {
        (AnomalySeverity::High, -20, "high-reach")
    } else {
        (AnomalySeverity::Medium, -10, "moderate-reach")
    }
}

#[must_use]
pub fn detect_ownership_change(
    cache: &Cache,
    ecosystem: Ecosystem,
    name: &str,
    author: Option<&str>,
    downloads: Option<u64>,
) -> Option<Anomaly> {
    let author = author?;
    let key = format!("owner:{ecosystem}:{name}");

    let previous = cache
        .get(&key, TTL_OWNERSHIP)
        .and_then(|v| v.as_str().map(str::to_owned));

    // Record the identity we saw, win or lose; the next scan compares
    // against it.
    if let Err(e) = cache.set(&key, &json!(author), TTL_OWNERSHIP) {
        tracing::debug!(key, error = %e, "failed to record maintainer identity");
    }

    let previous = previous?;
    if previous == author {
        return None;
    }

    let (severity, penalty, reach) = severity_for_reach(downloads.unwrap_or(0));
    Some(
        Anomaly::new(
            AnomalyKind::OwnershipChange,
            severity,
            format!(
                "maintainer changed from '{previous}' to '{author}' ({reach} package)"
            ),
        )
        .with_penalty(penalty),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, Cache) {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path().join("cache")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_first_observation_records_without_flag() {
        let (_dir, cache) = scratch();
        let finding =
            detect_ownership_change(&cache, Ecosystem::Ruby, "rails", Some("dhh"), Some(550_000_000));
        assert!(finding.is_none());
        // Identity recorded for the next scan.
        assert_eq!(
            cache.get("owner:ruby:rails", TTL_OWNERSHIP),
            Some(json!("dhh"))
        );
    }

    #[test]
    fn test_unchanged_owner_not_flagged() {
        let (_dir, cache) = scratch();
        detect_ownership_change(&cache, Ecosystem::Ruby, "rails", Some("dhh"), None);
        let finding = detect_ownership_change(&cache, Ecosystem::Ruby, "rails", Some("dhh"), None);
        assert!(finding.is_none());
    }

    #[test]
    fn test_change_scales_with_reach() {
        let (_dir, cache) = scratch();

        detect_ownership_change(&cache, Ecosystem::Ruby, "mega", Some("alice"), None);
        let finding =
            detect_ownership_change(&cache, Ecosystem::Ruby, "mega", Some("mallory"), Some(200_000_000))
                .unwrap();
        assert_eq!(finding.kind, AnomalyKind::OwnershipChange);
        assert_eq!(finding.severity, AnomalySeverity::High);
        assert_eq!(finding.penalty_points(), -40);

        detect_ownership_change(&cache, Ecosystem::Ruby, "big", Some("alice"), None);
        let finding =
            detect_ownership_change(&cache, Ecosystem::Ruby, "big", Some("mallory"), Some(20_000_000))
                .unwrap();
        assert_eq!(finding.severity, AnomalySeverity::High);
        assert_eq!(finding.penalty_points(), -20);

        detect_ownership_change(&cache, Ecosystem::Ruby, "small", Some("alice"), None);
        let finding =
            detect_ownership_change(&cache, Ecosystem::Ruby, "small", Some("mallory"), Some(5_000))
                .unwrap();
        assert_eq!(finding.severity, AnomalySeverity::Medium);
        assert_eq!(finding.penalty_points(), -10);
    }

    #[test]
    fn test_change_updates_recorded_identity() {
        let (_dir, cache) = scratch();
        detect_ownership_change(&cache, Ecosystem::Ruby, "gem", Some("alice"), None);
        detect_ownership_change(&cache, Ecosystem::Ruby, "gem", Some("mallory"), None);
        // A third scan under the new maintainer is quiet again.
        let finding = detect_ownership_change(&cache, Ecosystem::Ruby, "gem", Some("mallory"), None);
        assert!(finding.is_none());
    }

    #[test]
    fn test_missing_author_is_silent() {
        let (_dir, cache) = scratch();
        assert!(detect_ownership_change(&cache, Ecosystem::Python, "x", None, None).is_none());
    }

    #[test]
    fn test_keys_are_ecosystem_scoped() {
        let (_dir, cache) = scratch();
        detect_ownership_change(&cache, Ecosystem::Ruby, "tool", Some("alice"), None);
        // Same name in another ecosystem starts fresh.
        let finding =
            detect_ownership_change(&cache, Ecosystem::Python, "tool", Some("mallory"), None);
        assert!(finding.is_none());
    }
}
