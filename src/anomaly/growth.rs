//! Growth and timing detectors: download inflation and version bursts.

use jiff::Timestamp;

use crate::types::{Anomaly, AnomalyKind, AnomalySeverity, VersionRecord};

/// Packages above this watermark earned their download counts.
const INFLATION_WATERMARK: u64 = 50_000_000;

const DAY_SECONDS: i64 = 86_400;

fn oldest_release(versions: &[VersionRecord]) -> Option<Timestamp> {
    versions.iter().filter_map(|v| v.created_at).min()
}

fn age_days(versions: &[VersionRecord], now: Timestamp) -> Option<i64> {
    let oldest = oldest_release(versions)?;
    let days = (now.as_second() - oldest.as_second()) / DAY_SECONDS;
    (days >= 0).then_some(days)
}

fn releases_within(versions: &[VersionRecord], now: Timestamp, days: i64) -> usize {
    let floor = now.as_second() - days * DAY_SECONDS;
    versions
        .iter()
        .filter_map(|v| v.created_at)
        .filter(|ts| ts.as_second() >= floor)
        .count()
}

/// Download totals inconsistent with package age, typically bot-driven.
#[must_use]
pub fn detect_download_inflation(
    downloads: Option<u64>,
    versions: &[VersionRecord],
    now: Timestamp,
) -> Option<Anomaly> {
    let downloads = downloads?;
    if downloads >= INFLATION_WATERMARK {
        return None;
    }
    let age = age_days(versions, now)?;
    if age < 7 {
        // Launch-week numbers are too noisy to judge.
        return None;
    }

    let ratio = downloads as f64 / (age as f64 * 1000.0);
    let severity = if ratio > 100.0 && age < 30 {
        AnomalySeverity::High
    } else if ratio > 50.0 && age < 14 {
        AnomalySeverity::Medium
    } else {
        return None;
    };

    Some(Anomaly::new(
        AnomalyKind::DownloadInflation,
        severity,
        format!("{downloads} downloads across only {age} days of history"),
    ))
}

/// Burst publishing: 5+ versions inside 24 hours, or 10+ inside a week.
#[must_use]
pub fn detect_version_spike(versions: &[VersionRecord], now: Timestamp) -> Option<Anomaly> {
    let last_day = releases_within(versions, now, 1);
    if last_day >= 5 {
        return Some(Anomaly::new(
            AnomalyKind::VersionSpike,
            AnomalySeverity::High,
            format!("{last_day} versions published in the last 24 hours"),
        ));
    }
    let last_week = releases_within(versions, now, 7);
    if last_week >= 10 {
        return Some(Anomaly::new(
            AnomalyKind::VersionSpike,
            AnomalySeverity::Medium,
            format!("{last_week} versions published in the last 7 days"),
        ));
    }
    None
}

/// First release less than 90 days ago.
#[must_use]
pub fn detect_new_package(versions: &[VersionRecord], now: Timestamp) -> Option<Anomaly> {
    let age = age_days(versions, now)?;
    (age < 90).then(|| {
        Anomaly::new(
            AnomalyKind::NewPackage,
            AnomalySeverity::Low,
            format!("first release only {age} days ago"),
        )
    })
}

/// More than 20 versions inside the first 30 days.
#[must_use]
pub fn detect_rapid_versioning(versions: &[VersionRecord], now: Timestamp) -> Option<Anomaly> {
    let recent = releases_within(versions, now, 30);
    (recent > 20).then(|| {
        Anomaly::new(
            AnomalyKind::RapidVersioning,
            AnomalySeverity::Medium,
            format!("{recent} versions inside 30 days"),
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn now() -> Timestamp {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    fn version_at(now: Timestamp, seconds_ago: i64) -> VersionRecord {
        VersionRecord {
            version: format!("0.0.{seconds_ago}"),
            created_at: Some(Timestamp::from_second(now.as_second() - seconds_ago).unwrap()),
            yanked: false,
        }
    }

    fn versions_days_ago(now: Timestamp, days: &[i64]) -> Vec<VersionRecord> {
        days.iter()
            .map(|d| version_at(now, d * DAY_SECONDS))
            .collect()
    }

    #[test]
    fn test_inflation_high() {
        // 20 days old, 3M downloads: ratio 150.
        let versions = versions_days_ago(now(), &[20]);
        let finding = detect_download_inflation(Some(3_000_000), &versions, now()).unwrap();
        assert_eq!(finding.kind, AnomalyKind::DownloadInflation);
        assert_eq!(finding.severity, AnomalySeverity::High);
    }

    #[test]
    fn test_inflation_medium() {
        // 10 days old, 600K downloads: ratio 60.
        let versions = versions_days_ago(now(), &[10]);
        let finding = detect_download_inflation(Some(600_000), &versions, now()).unwrap();
        assert_eq!(finding.severity, AnomalySeverity::Medium);
    }

    #[test]
    fn test_inflation_skips_established_packages() {
        let versions = versions_days_ago(now(), &[20]);
        assert!(detect_download_inflation(Some(60_000_000), &versions, now()).is_none());
    }

    #[test]
    fn test_inflation_skips_launch_week() {
        let versions = versions_days_ago(now(), &[5]);
        assert!(detect_download_inflation(Some(1_000_000), &versions, now()).is_none());
    }

    #[test]
    fn test_inflation_ordinary_growth_not_flagged() {
        // 100 days old, 2M downloads: ratio 20.
        let versions = versions_days_ago(now(), &[100]);
        assert!(detect_download_inflation(Some(2_000_000), &versions, now()).is_none());
    }

    #[test]
    fn test_version_spike_boundary() {
        // Exactly 5 inside 24h: HIGH.
        let hours = [1, 2, 3, 4, 5];
        let versions: Vec<_> = hours
            .iter()
            .map(|h| version_at(now(), h * 3600))
            .collect();
        let finding = detect_version_spike(&versions, now()).unwrap();
        assert_eq!(finding.severity, AnomalySeverity::High);

        // Four is business as usual.
        let versions: Vec<_> = hours[..4]
            .iter()
            .map(|h| version_at(now(), h * 3600))
            .collect();
        assert!(detect_version_spike(&versions, now()).is_none());
    }

    #[test]
    fn test_version_spike_week_window() {
        // Ten versions across six days, none in the last 24h.
        let versions: Vec<_> = (0..10)
            .map(|i| version_at(now(), (2 + i / 2) * DAY_SECONDS))
            .collect();
        let finding = detect_version_spike(&versions, now()).unwrap();
        assert_eq!(finding.severity, AnomalySeverity::Medium);
    }

    #[test]
    fn test_new_package_boundary() {
        let versions = versions_days_ago(now(), &[89]);
        let finding = detect_new_package(&versions, now()).unwrap();
        assert_eq!(finding.severity, AnomalySeverity::Low);

        let versions = versions_days_ago(now(), &[90]);
        assert!(detect_new_package(&versions, now()).is_none());
    }

    #[test]
    fn test_new_package_without_timestamps() {
        let versions = vec![VersionRecord {
            version: "1.0.0".into(),
            created_at: None,
            yanked: false,
        }];
        assert!(detect_new_package(&versions, now()).is_none());
    }

    #[test]
    fn test_rapid_versioning_boundary() {
        let versions: Vec<_> = (0..21).map(|i| version_at(now(), i * 3600 * 24)).collect();
        // 21 releases, all within 30 days.
        let finding = detect_rapid_versioning(&versions, now()).unwrap();
        assert_eq!(finding.kind, AnomalyKind::RapidVersioning);

        let versions: Vec<_> = (0..20).map(|i| version_at(now(), i * 3600 * 24)).collect();
        assert!(detect_rapid_versioning(&versions, now()).is_none());
    }
}
