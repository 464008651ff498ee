//! Namespace-squat detection: `<popular-base>-something` with no adoption.

use crate::registry::PopularPackage;
use crate::types::{Anomaly, AnomalyKind, AnomalySeverity};

/// Bases below this download count are not worth squatting on.
const BASE_FLOOR: u64 = 10_000_000;
/// Subject adoption below 1% of the base is suspect.
const SUBJECT_RATIO: f64 = 0.01;
/// Below this absolute count the squat is rated HIGH.
const HIGH_SEVERITY_FLOOR: u64 = 1_000;

fn prefix_token(name: &str) -> Option<&str> {
    let token = name.split(['-', '_']).next()?;
    (token != name && !token.is_empty()).then_some(token)
}

/// Download-ratio variant, for registries that report totals. The prefix
/// token must match a popular base with at least 10M downloads; a subject
/// under 1% of the base is flagged, HIGH below 1K downloads of its own.
#[must_use]
pub fn detect_namespace_squat(
    name: &str,
    downloads: Option<u64>,
    popular: &[PopularPackage],
) -> Option<Anomaly> {
    let prefix = prefix_token(name)?;
    let base = popular
        .iter()
        .find(|p| p.name == prefix && p.downloads >= BASE_FLOOR)?;

    let subject = downloads.unwrap_or(0);
    if (subject as f64) >= (base.downloads as f64) * SUBJECT_RATIO {
        return None;
    }

    let severity = if subject < HIGH_SEVERITY_FLOOR {
        AnomalySeverity::High
    } else {
        AnomalySeverity::Medium
    };
    Some(
        Anomaly::new(
            AnomalyKind::NamespaceSquat,
            severity,
            format!(
                "'{name}' rides the '{}' namespace with {subject} downloads against the base's {}",
                base.name, base.downloads
            ),
        )
        .with_target(&base.name),
    )
}

/// Hard-coded-list variant, for registries without download counts: any
/// prefix match on a magnet namespace is flagged.
#[must_use]
pub fn detect_magnet_namespace(name: &str, magnets: &[&str]) -> Option<Anomaly> {
    let prefix = prefix_token(name)?;
    let base = magnets.iter().find(|m| **m == prefix)?;
    Some(
        Anomaly::new(
            AnomalyKind::NamespaceSquat,
            AnomalySeverity::High,
            format!("'{name}' squats on the '{base}' namespace"),
        )
        .with_target(base),
    )
}
