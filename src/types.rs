//! Core data model: package references, trust results, anomalies, verdicts.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Registries the scanner knows how to interrogate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ecosystem {
    Ruby,
    Python,
    GoModule,
}

impl Ecosystem {
    /// Parse an ecosystem tag, accepting the aliases SBOM extractors emit.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "ruby" | "rubygems" | "gem" => Some(Self::Ruby),
            "python" | "pypi" | "pip" => Some(Self::Python),
            "go" | "golang" | "gomod" | "go-module" | "module-path" => Some(Self::GoModule),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ruby => "ruby",
            Self::Python => "python",
            Self::GoModule => "go-module",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a package name to prevent injection through crafted SBOMs.
///
/// Names may contain alphanumerics, `-`, `_`, `.`, `/`, `@`. Module-path
/// ecosystems need `/` and `.`; scoped registries need `@`.
pub fn validate_package_name(name: &str) -> Result<()> {
    const MAX_LENGTH: usize = 200;

    if name.is_empty() {
        return Err(ScanError::InvalidName("name cannot be empty".into()));
    }
    if name.len() > MAX_LENGTH {
        return Err(ScanError::InvalidName(format!(
            "name too long (max {MAX_LENGTH} characters)"
        )));
    }
    for c in name.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '/' | '@' => {}
            _ => {
                return Err(ScanError::InvalidName(format!(
                    "invalid character '{c}' in package name"
                )));
            }
        }
    }
    // Path traversal through module-path names
    if name.contains("..") {
        return Err(ScanError::InvalidName("name cannot contain '..'".into()));
    }
    if name.starts_with('/') {
        return Err(ScanError::InvalidName("name cannot start with '/'".into()));
    }
    Ok(())
}

/// Validate a version string from an SBOM.
pub fn validate_version(version: &str) -> Result<()> {
    const MAX_LENGTH: usize = 50;

    if version.is_empty() {
        return Err(ScanError::InvalidVersion("version cannot be empty".into()));
    }
    if version.len() > MAX_LENGTH {
        return Err(ScanError::InvalidVersion(format!(
            "version too long (max {MAX_LENGTH} characters)"
        )));
    }
    for c in version.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '+' | '-' => {}
            _ => {
                return Err(ScanError::InvalidVersion(format!(
                    "invalid character '{c}' in version"
                )));
            }
        }
    }
    Ok(())
}

/// A single `(ecosystem, name, version)` triple from the SBOM extractor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: String,
}

impl PackageRef {
    /// Build a validated reference. The extractor pre-deduplicates; this
    /// guards the character set and length limits.
    pub fn new(ecosystem: Ecosystem, name: &str, version: &str) -> Result<Self> {
        validate_package_name(name)?;
        validate_version(version)?;
        Ok(Self {
            ecosystem,
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.ecosystem, self.name, self.version)
    }
}

/// One published version as the registry reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    /// Publication timestamp; some registries omit it.
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub yanked: bool,
}

/// Resolved source-host repository for a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRepo {
    pub owner: String,
    pub repo: String,
}

impl fmt::Display for SourceRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Ecosystem-native metadata, normalized to the fields scoring consumes.
/// Owned by the adapter that fetched it, for the duration of one scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageData {
    pub downloads: Option<u64>,
    pub author: Option<String>,
    pub license: Option<String>,
    #[serde(default)]
    pub classifiers: Vec<String>,
    pub repository_url: Option<String>,
    pub homepage_url: Option<String>,
    /// Direct dependency count, where the registry exposes one.
    pub dependency_count: Option<u32>,
    /// Aggregated security-posture score for the source repository.
    pub scorecard: Option<f64>,
    #[serde(default)]
    pub advisory_count: u32,
    #[serde(default)]
    pub repo_quality: bool,
    /// Standard-library or vendored-stdlib module; short-circuits scoring.
    #[serde(default)]
    pub stdlib: bool,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
}

impl PackageData {
    /// Timestamp of the oldest known release.
    #[must_use]
    pub fn oldest_release(&self) -> Option<Timestamp> {
        self.versions.iter().filter_map(|v| v.created_at).min()
    }
}

/// One scored signal. Signal names are unique within a breakdown; a
/// duplicate would double-count the signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustBreakdownEntry {
    pub signal: String,
    pub points: i32,
    pub reason: String,
}

impl TrustBreakdownEntry {
    #[must_use]
    pub fn new(signal: &str, points: i32, reason: impl Into<String>) -> Self {
        Self {
            signal: signal.to_string(),
            points,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
    Critical,
    High,
    Medium,
    Low,
    Untrusted,
    NotFound,
}

/// Map a clamped score to its level. Never yields `NotFound`; that level
/// is reserved for the absent-metadata path.
#[must_use]
pub fn level_for_score(score: i32) -> TrustLevel {
    match score {
        95.. => TrustLevel::Critical,
        80..=94 => TrustLevel::High,
        60..=79 => TrustLevel::Medium,
        40..=59 => TrustLevel::Low,
        _ => TrustLevel::Untrusted,
    }
}

/// Clamp a raw signal sum into the emitted score range.
#[must_use]
pub fn clamp_score(raw: i32) -> i32 {
    raw.clamp(0, 100)
}

/// Outcome of the staged scorer for one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustResult {
    /// Always within `[0, 100]`.
    pub score: i32,
    pub level: TrustLevel,
    pub breakdown: Vec<TrustBreakdownEntry>,
    /// Scoring stage that produced the verdict: 1-3, or 0 when the package
    /// does not exist in the registry.
    pub stage: u8,
}

impl TrustResult {
    /// The fixed result for a package the registry has never heard of.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            score: 0,
            level: TrustLevel::NotFound,
            breakdown: Vec::new(),
            stage: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalySeverity {
    High,
    Medium,
    Low,
}

impl AnomalySeverity {
    /// Default score penalty when the detector does not override it.
    #[must_use]
    pub const fn default_penalty(self) -> i32 {
        match self {
            Self::High => -20,
            Self::Medium => -10,
            Self::Low => -5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Typosquat,
    Homoglyph,
    NamespaceSquat,
    DownloadInflation,
    VersionSpike,
    NewPackage,
    RapidVersioning,
    OwnershipChange,
    NamePattern,
}

impl AnomalyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Typosquat => "typosquat",
            Self::Homoglyph => "homoglyph",
            Self::NamespaceSquat => "namespace_squat",
            Self::DownloadInflation => "download_inflation",
            Self::VersionSpike => "version_spike",
            Self::NewPackage => "new_package",
            Self::RapidVersioning => "rapid_versioning",
            Self::OwnershipChange => "ownership_change",
            Self::NamePattern => "name_pattern",
        }
    }
}

/// One severity-tagged finding from a pattern detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub description: String,
    /// The legitimate package this one appears to impersonate, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_package: Option<String>,
    /// Detector-specific penalty override; the ownership detector scales
    /// its penalty with the package's reach.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalty: Option<i32>,
}

impl Anomaly {
    #[must_use]
    pub fn new(kind: AnomalyKind, severity: AnomalySeverity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            target_package: None,
            penalty: None,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: &str) -> Self {
        self.target_package = Some(target.to_string());
        self
    }

    #[must_use]
    pub fn with_penalty(mut self, penalty: i32) -> Self {
        self.penalty = Some(penalty);
        self
    }

    /// Signed points this finding subtracts from the trust score.
    /// Applied exactly once, by the orchestrator.
    #[must_use]
    pub fn penalty_points(&self) -> i32 {
        self.penalty
            .unwrap_or_else(|| self.severity.default_penalty())
    }
}

/// Terminal disposition for a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Verified,
    Warn,
    Block,
    NotFound,
}

impl Action {
    /// Sort rank for reporting: most severe first.
    #[must_use]
    pub const fn severity_rank(self) -> u8 {
        match self {
            Self::Block => 0,
            Self::NotFound => 1,
            Self::Warn => 2,
            Self::Verified => 3,
        }
    }
}

/// Terminal output for one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVerdict {
    pub package: PackageRef,
    pub trust: TrustResult,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
    pub action: Action,
    /// Set when an unexpected failure downgraded this package to a warning
    /// instead of poisoning the scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate record handed to the reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total: usize,
    pub verified: usize,
    pub suspicious: usize,
    pub high_risk: usize,
    pub not_found: usize,
    /// True when a fatal source-host rate limit stopped the scan early.
    #[serde(default)]
    pub partial: bool,
    /// Packages fully evaluated before the scan ended.
    pub completed: usize,
    pub results: Vec<PackageVerdict>,
}
