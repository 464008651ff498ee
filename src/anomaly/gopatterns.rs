//! Module-path name-pattern checks.
//!
//! Slopsquatted Go repositories cluster on a few naming tics: a `-go`
//! suffix, a `golang-` prefix, stuttered letters, and trailing digit runs.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Anomaly, AnomalyKind, AnomalySeverity};

static TRAILING_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\d{2,}$").expect("valid trailing-digits pattern")
});

fn has_triple_repeat(name: &str) -> bool {
    let chars: Vec<char> = name.chars().collect();
    chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2])
}

fn suspicious_repo_name(repo: &str) -> Option<&'static str> {
    if repo.ends_with("-go") {
        return Some("'-go' suffix");
    }
    if repo.starts_with("golang-") {
        return Some("'golang-' prefix");
    }
    if has_triple_repeat(repo) {
        return Some("repeated letters");
    }
    if TRAILING_DIGITS_RE.is_match(repo) {
        return Some("trailing digit run");
    }
    None
}

/// Flag module paths whose repository segment matches a squat naming tic.
#[must_use]
pub fn detect_name_pattern(module: &str) -> Option<Anomaly> {
    let repo = module.rsplit('/').next().unwrap_or(module);
    let pattern = suspicious_repo_name(repo)?;
    Some(Anomaly::new(
        AnomalyKind::NamePattern,
        AnomalySeverity::Medium,
        format!("repository name '{repo}' matches squat pattern: {pattern}"),
    ))
}
