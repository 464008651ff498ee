//! Three-stage lazy trust scoring.
//!
//! Most legitimate packages clear stage 1 from metadata already in hand;
//! a small remainder needs the dependents count; only the long tail pays
//! for source-host calls. Each stage finalizes as soon as the accumulated
//! score crosses the confidence threshold.

use std::time::Instant;

use crate::error::Result;
use crate::registry::github::GithubClient;
use crate::registry::{EcosystemAdapter, dependents_points, source_repo_entries};
use crate::types::{
    PackageData, TrustBreakdownEntry, TrustResult, clamp_score, level_for_score,
};

/// Accumulated score at which a stage may finalize.
pub const CONFIDENCE_THRESHOLD: i32 = 70;

/// Scorer output; metadata rides along so the orchestrator can run
/// anomaly detection without refetching.
pub struct Evaluation {
    pub trust: TrustResult,
    pub data: Option<PackageData>,
}

/// Append an entry unless its signal is already present; a duplicate
/// would double-count the signal.
fn push_unique(breakdown: &mut Vec<TrustBreakdownEntry>, entry: TrustBreakdownEntry) {
    if breakdown.iter().any(|e| e.signal == entry.signal) {
        tracing::debug!(signal = %entry.signal, "duplicate signal suppressed");
        return;
    }
    breakdown.push(entry);
}

fn finalize(breakdown: Vec<TrustBreakdownEntry>, stage: u8) -> TrustResult {
    let raw: i32 = breakdown.iter().map(|e| e.points).sum();
    let score = clamp_score(raw);
    TrustResult {
        score,
        level: level_for_score(score),
        breakdown,
        stage,
    }
}

/// Drive the adapter lazily across the three stages.
pub async fn evaluate(
    adapter: &dyn EcosystemAdapter,
    github: &GithubClient,
    name: &str,
    profile: bool,
) -> Result<Evaluation> {
    let started = Instant::now();

    let Some(data) = adapter.fetch_metadata(name).await? else {
        return Ok(Evaluation {
            trust: TrustResult::not_found(),
            data: None,
        });
    };

    // Stage 1: basic signals from the metadata already in hand.
    let mut breakdown = Vec::new();
    for entry in adapter.calculate_trust(name, &data) {
        push_unique(&mut breakdown, entry);
    }
    let mut score: i32 = breakdown.iter().map(|e| e.points).sum();
    if profile {
        tracing::debug!(target: "profile", name, stage = 1, score, elapsed_ms = started.elapsed().as_millis() as u64);
    }
    if score >= CONFIDENCE_THRESHOLD {
        return Ok(Evaluation {
            trust: finalize(breakdown, 1),
            data: Some(data),
        });
    }

    // Stage 2: reverse dependencies, where the registry has them.
    if let Some(count) = adapter.fetch_dependents_count(name).await? {
        let points = dependents_points(count, adapter.policy());
        if points > 0 {
            push_unique(
                &mut breakdown,
                TrustBreakdownEntry::new(
                    "dependents",
                    points,
                    format!("{count} packages depend on this one"),
                ),
            );
        }
    }
    score = breakdown.iter().map(|e| e.points).sum();
    if profile {
        tracing::debug!(target: "profile", name, stage = 2, score, elapsed_ms = started.elapsed().as_millis() as u64);
    }
    if score >= CONFIDENCE_THRESHOLD {
        return Ok(Evaluation {
            trust: finalize(breakdown, 2),
            data: Some(data),
        });
    }

    // Stage 3: source-host stars and ownership.
    if let Some(repo) = adapter.resolve_source_repo(name, &data).await?
        && let Some(facts) = github.repo_facts(&repo).await?
    {
        for entry in source_repo_entries(&facts, adapter.policy()) {
            push_unique(&mut breakdown, entry);
        }
    }
    if profile {
        tracing::debug!(target: "profile", name, stage = 3, elapsed_ms = started.elapsed().as_millis() as u64);
    }
    Ok(Evaluation {
        trust: finalize(breakdown, 3),
        data: Some(data),
    })
}
