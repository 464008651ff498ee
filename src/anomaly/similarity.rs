//! Name-similarity detectors: typosquats and homoglyph confusables.

use crate::registry::PopularPackage;
use crate::types::{Anomaly, AnomalyKind, AnomalySeverity};

/// Subject adoption below this fraction of the target's marks a squat;
/// above it, the package is treated as an accepted plugin or fork.
const ADOPTION_RATIO: f64 = 0.001;

/// Visually-similar substitutions attackers lean on. Deliberately small
/// and Latin-centric; the pairs map a confusable onto its canonical form.
const CONFUSABLE_PAIRS: &[(&str, &str)] = &[("0", "O"), ("1", "l"), ("1", "I"), ("rn", "m"), ("vv", "w")];

/// Classic dynamic-programming edit distance.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

fn is_popular(name: &str, popular: &[PopularPackage]) -> bool {
    popular.iter().any(|p| p.name == name)
}

/// Too little adoption relative to the impersonated target. Registries
/// without download counts offer no exonerating signal, so an unknown
/// subject is treated as unadopted.
fn negligible_adoption(subject: Option<u64>, target: u64) -> bool {
    match (subject, target) {
        (None, _) => true,
        // No baseline either: only the name evidence remains.
        (Some(_), 0) => true,
        (Some(subject), target) => (subject as f64) < (target as f64) * ADOPTION_RATIO,
    }
}

/// Edit-distance-1 variation of a popular package with negligible
/// adoption. Exact matches are the target itself and never flagged.
#[must_use]
pub fn detect_typosquat(
    name: &str,
    downloads: Option<u64>,
    popular: &[PopularPackage],
) -> Option<Anomaly> {
    if is_popular(name, popular) {
        return None;
    }

    // Prefer the most-adopted target when several names are one edit away.
    let mut candidates: Vec<&PopularPackage> = popular
        .iter()
        .filter(|p| levenshtein(name, &p.name) == 1)
        .collect();
    candidates.sort_by(|a, b| b.downloads.cmp(&a.downloads));
    let target = candidates.first()?;

    if !negligible_adoption(downloads, target.downloads) {
        return None;
    }

    Some(
        Anomaly::new(
            AnomalyKind::Typosquat,
            AnomalySeverity::High,
            format!(
                "'{name}' is one edit away from '{}' with negligible adoption",
                target.name
            ),
        )
        .with_target(&target.name),
    )
}

/// Substituting a confusable for its canonical form yields a known
/// popular name.
#[must_use]
pub fn detect_homoglyph(name: &str, popular: &[PopularPackage]) -> Option<Anomaly> {
    if is_popular(name, popular) {
        return None;
    }

    for (confusable, canonical) in CONFUSABLE_PAIRS {
        if !name.contains(confusable) {
            continue;
        }
        let substituted = name.replace(confusable, canonical);
        if substituted != name
            && let Some(target) = popular.iter().find(|p| p.name == substituted)
        {
            return Some(
                Anomaly::new(
                    AnomalyKind::Homoglyph,
                    AnomalySeverity::High,
                    format!(
                        "'{name}' impersonates '{}' via confusable '{confusable}'",
                        target.name
                    ),
                )
                .with_target(&target.name),
            );
        }
    }
    None
}
