//! Concurrent scan orchestration.
//!
//! A fixed-size worker pool evaluates distinct packages in parallel; each
//! worker runs one package straight through score, gated anomaly
//! detection, penalty application, and action selection. A sticky fatal
//! flag, set by the first source-host quota error, stops new dispatches
//! while in-flight workers drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::registry::{self, EcosystemAdapter};
use crate::scorer;
use crate::services::Services;
use crate::types::{
    Action, Anomaly, AnomalySeverity, Ecosystem, PackageRef, PackageVerdict, ScanSummary,
    TrustBreakdownEntry, TrustLevel, TrustResult, clamp_score, level_for_score,
};

/// Packages below this score get the anomaly detectors.
const ANOMALY_GATE: i32 = 60;
/// At or above: verified outright.
const VERIFIED_THRESHOLD: i32 = 60;
/// Below: warn, or block when a high-severity anomaly concurs.
const BLOCK_THRESHOLD: i32 = 40;

pub struct Scanner {
    services: Services,
    adapters: HashMap<Ecosystem, Arc<dyn EcosystemAdapter>>,
    config: ScanConfig,
    fatal: Arc<AtomicBool>,
}

impl Scanner {
    /// Scanner with the built-in adapters.
    pub fn new(config: ScanConfig) -> Result<Self> {
        let services = Services::new(&config)?;
        let adapters = registry::default_adapters(&services);
        Ok(Self::with_adapters(config, services, adapters))
    }

    /// Scanner over an explicit adapter set; embedders and tests inject
    /// their own implementations here.
    #[must_use]
    pub fn with_adapters(
        config: ScanConfig,
        services: Services,
        adapters: HashMap<Ecosystem, Arc<dyn EcosystemAdapter>>,
    ) -> Self {
        Self {
            services,
            adapters,
            config,
            fatal: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Evaluate every package and aggregate the verdicts. Never panics and
    /// never terminates the process; a fatal source-host rate limit yields
    /// a partial summary instead.
    pub async fn scan(&self, packages: Vec<PackageRef>) -> ScanSummary {
        let supported: Vec<PackageRef> = packages
            .into_iter()
            .filter(|pkg| {
                let known = self.adapters.contains_key(&pkg.ecosystem);
                if !known {
                    tracing::warn!(package = %pkg, "unsupported ecosystem, skipping");
                }
                known
            })
            .collect();
        let total = supported.len();

        tracing::info!(total, workers = self.config.workers, "starting scan");

        let results: Vec<Option<PackageVerdict>> = stream::iter(
            supported
                .into_iter()
                .map(|pkg| self.evaluate_package(pkg)),
        )
        .buffer_unordered(self.config.workers.max(1))
        .collect()
        .await;

        let verdicts: Vec<PackageVerdict> = results.into_iter().flatten().collect();
        let partial = self.fatal.load(Ordering::SeqCst);
        if partial {
            tracing::error!(
                completed = verdicts.len(),
                total,
                "scan aborted by source-host rate limit; set GITHUB_TOKEN to raise the quota"
            );
        }

        summarize(verdicts, total, partial)
    }

    async fn evaluate_package(&self, pkg: PackageRef) -> Option<PackageVerdict> {
        // Checked at dispatch: once the flag is set, no new work starts.
        if self.fatal.load(Ordering::SeqCst) {
            return None;
        }

        match self.evaluate_inner(&pkg).await {
            Ok(verdict) => Some(verdict),
            Err(e) if e.is_fatal() => {
                self.fatal.store(true, Ordering::SeqCst);
                tracing::error!(package = %pkg, "source-host quota exhausted mid-scan");
                None
            }
            Err(e) => {
                // One bad package must not poison the scan.
                tracing::warn!(package = %pkg, error = %e, "evaluation failed, downgrading to warning");
                Some(error_verdict(pkg, &e))
            }
        }
    }

    async fn evaluate_inner(&self, pkg: &PackageRef) -> Result<PackageVerdict> {
        let adapter = self
            .adapters
            .get(&pkg.ecosystem)
            .ok_or_else(|| ScanError::UnsupportedEcosystem(pkg.ecosystem.to_string()))?;
        let name = adapter.normalize_name(&pkg.name);

        let evaluation =
            scorer::evaluate(adapter.as_ref(), &self.services.github, &name, self.config.profile)
                .await?;
        let mut trust = evaluation.trust;

        let mut anomalies = Vec::new();
        if trust.level != TrustLevel::NotFound
            && trust.score < ANOMALY_GATE
            && let Some(data) = &evaluation.data
        {
            let popular = match adapter.popular_packages().await {
                Ok(list) => list,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!(package = %pkg, error = %e, "popular list unavailable");
                    Arc::new(Vec::new())
                }
            };
            match adapter.detect_anomalies(&name, data, &popular).await {
                Ok(found) => anomalies = found,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!(package = %pkg, error = %e, "anomaly detection unavailable");
                }
            }
        }

        apply_penalties(&mut trust, &anomalies);
        let action = decide_action(&trust, &anomalies);

        Ok(PackageVerdict {
            package: pkg.clone(),
            trust,
            anomalies,
            action,
            error: None,
        })
    }
}

/// Subtract each anomaly's penalty exactly once, then re-clamp.
fn apply_penalties(trust: &mut TrustResult, anomalies: &[Anomaly]) {
    if anomalies.is_empty() {
        return;
    }
    let mut score = trust.score;
    for anomaly in anomalies {
        let points = anomaly.penalty_points();
        score += points;
        trust.breakdown.push(TrustBreakdownEntry::new(
            &format!("anomaly_{}", anomaly.kind.as_str()),
            points,
            anomaly.description.clone(),
        ));
    }
    trust.score = clamp_score(score);
    trust.level = level_for_score(trust.score);
}

fn decide_action(trust: &TrustResult, anomalies: &[Anomaly]) -> Action {
    if trust.level == TrustLevel::NotFound {
        return Action::NotFound;
    }
    if trust.score >= VERIFIED_THRESHOLD {
        return Action::Verified;
    }
    let high_anomaly = anomalies
        .iter()
        .any(|a| a.severity == AnomalySeverity::High);
    let low_score = trust.score < BLOCK_THRESHOLD;
    match (low_score, high_anomaly) {
        (true, true) => Action::Block,
        (true, false) | (false, true) => Action::Warn,
        // Some ecosystems structurally score lower; a clean package in the
        // gray band stays verified.
        (false, false) => Action::Verified,
    }
}

fn error_verdict(pkg: PackageRef, error: &ScanError) -> PackageVerdict {
    PackageVerdict {
        package: pkg,
        trust: TrustResult {
            score: 0,
            level: TrustLevel::Untrusted,
            breakdown: Vec::new(),
            stage: 1,
        },
        anomalies: Vec::new(),
        action: Action::Warn,
        error: Some(error.to_string()),
    }
}

/// Count per action and sort by action severity, then name.
fn summarize(mut verdicts: Vec<PackageVerdict>, total: usize, partial: bool) -> ScanSummary {
    verdicts.sort_by(|a, b| {
        a.action
            .severity_rank()
            .cmp(&b.action.severity_rank())
            .then_with(|| a.package.name.cmp(&b.package.name))
    });

    let count = |action: Action| verdicts.iter().filter(|v| v.action == action).count();
    ScanSummary {
        total,
        verified: count(Action::Verified),
        suspicious: count(Action::Warn),
        high_risk: count(Action::Block),
        not_found: count(Action::NotFound),
        partial,
        completed: verdicts.len(),
        results: verdicts,
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::AnomalyKind;

    fn trust(score: i32, stage: u8) -> TrustResult {
        TrustResult {
            score,
            level: level_for_score(score),
            breakdown: Vec::new(),
            stage,
        }
    }

    fn high_anomaly() -> Anomaly {
        Anomaly::new(AnomalyKind::Typosquat, AnomalySeverity::High, "squat")
    }

    fn low_anomaly() -> Anomaly {
        Anomaly::new(AnomalyKind::NewPackage, AnomalySeverity::Low, "young")
    }

    #[test]
    fn test_action_not_found() {
        assert_eq!(decide_action(&TrustResult::not_found(), &[]), Action::NotFound);
    }

    #[test]
    fn test_action_verified_at_threshold() {
        assert_eq!(decide_action(&trust(60, 1), &[]), Action::Verified);
        assert_eq!(decide_action(&trust(95, 1), &[]), Action::Verified);
    }

    #[test]
    fn test_action_gray_band() {
        // [40, 60) without high-severity anomalies stays verified.
        assert_eq!(decide_action(&trust(45, 3), &[]), Action::Verified);
        assert_eq!(decide_action(&trust(45, 3), &[low_anomaly()]), Action::Verified);
        // A high-severity anomaly in the gray band warns.
        assert_eq!(decide_action(&trust(45, 3), &[high_anomaly()]), Action::Warn);
    }

    #[test]
    fn test_action_low_score() {
        assert_eq!(decide_action(&trust(30, 3), &[]), Action::Warn);
        // Both thresholds tripped: block.
        assert_eq!(decide_action(&trust(30, 3), &[high_anomaly()]), Action::Block);
    }

    #[test]
    fn test_penalties_applied_once_and_clamped() {
        let mut t = trust(50, 3);
        let anomalies = vec![high_anomaly(), low_anomaly()];
        apply_penalties(&mut t, &anomalies);
        assert_eq!(t.score, 25);
        assert_eq!(t.level, TrustLevel::Untrusted);
        // One breakdown entry per anomaly, named by kind.
        assert!(t.breakdown.iter().any(|e| e.signal == "anomaly_typosquat" && e.points == -20));
        assert!(t.breakdown.iter().any(|e| e.signal == "anomaly_new_package" && e.points == -5));

        let mut floor = trust(10, 3);
        apply_penalties(&mut floor, &[high_anomaly(), high_anomaly()]);
        assert_eq!(floor.score, 0);
    }

    #[test]
    fn test_penalty_override_respected() {
        let mut t = trust(55, 3);
        let takeover = Anomaly::new(
            AnomalyKind::OwnershipChange,
            AnomalySeverity::High,
            "handover",
        )
        .with_penalty(-40);
        apply_penalties(&mut t, &[takeover]);
        assert_eq!(t.score, 15);
    }

    #[test]
    fn test_error_verdict_shape() {
        let pkg = PackageRef::new(Ecosystem::Ruby, "rails", "7.1.0").unwrap();
        let verdict = error_verdict(pkg, &ScanError::Other("boom".into()));
        assert_eq!(verdict.action, Action::Warn);
        assert_eq!(verdict.error.as_deref(), Some("boom"));
        // Not-found invariant: stage 0 is reserved for absent metadata.
        assert_ne!(verdict.trust.stage, 0);
        assert_ne!(verdict.trust.level, TrustLevel::NotFound);
    }

    #[test]
    fn test_summarize_counts_and_order() {
        let mk = |name: &str, action: Action| PackageVerdict {
            package: PackageRef::new(Ecosystem::Ruby, name, "1.0.0").unwrap(),
            trust: trust(50, 1),
            anomalies: Vec::new(),
            action,
            error: None,
        };

        let summary = summarize(
            vec![
                mk("zeta", Action::Verified),
                mk("beta", Action::Block),
                mk("alpha", Action::Verified),
                mk("ghost", Action::NotFound),
                mk("odd", Action::Warn),
            ],
            5,
            false,
        );

        assert_eq!(summary.total, 5);
        assert_eq!(summary.verified, 2);
        assert_eq!(summary.suspicious, 1);
        assert_eq!(summary.high_risk, 1);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.completed, 5);
        assert!(!summary.partial);

        let order: Vec<&str> = summary
            .results
            .iter()
            .map(|v| v.package.name.as_str())
            .collect();
        assert_eq!(order, vec!["beta", "ghost", "odd", "alpha", "zeta"]);
    }

    #[test]
    fn test_summarize_partial() {
        let summary = summarize(Vec::new(), 12, true);
        assert!(summary.partial);
        assert_eq!(summary.total, 12);
        assert_eq!(summary.completed, 0);
    }
}
