//! Course quality scoring and release readiness.
//!
//! `QualityScore = Coverage (0..30) + Defects (0..40) + Reliability (0..30)`,
//! clamped to `0..=100`. Weights and thresholds are configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ExerciseTestResults, Severity};

const COVERAGE_POINTS: f64 = 30.0;
const DEFECT_POINTS: f64 = 40.0;
const RELIABILITY_POINTS: f64 = 30.0;

/// Penalty weight per bug severity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeverityWeights {
    #[serde(rename = "P0")]
    pub p0: f64,
    #[serde(rename = "P1")]
    pub p1: f64,
    #[serde(rename = "P2")]
    pub p2: f64,
    #[serde(rename = "P3")]
    pub p3: f64,
    #[serde(rename = "ENV")]
    pub env: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            p0: 40.0,
            p1: 20.0,
            p2: 5.0,
            p3: 1.0,
            env: 0.0,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::P0 => self.p0,
            Severity::P1 => self.p1,
            Severity::P2 => self.p2,
            Severity::P3 => self.p3,
            Severity::Env => self.env,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: SeverityWeights,
    /// Minimum score for `Ready`.
    pub ready_threshold: f64,
    /// Minimum score for `Conditional`.
    pub conditional_threshold: f64,
    /// Check categories that count toward Reliability.
    pub reliability_categories: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: SeverityWeights::default(),
            ready_threshold: 90.0,
            conditional_threshold: 70.0,
            reliability_categories: vec!["cleanup".to_string(), "idempotency".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    Ready,
    Conditional,
    NotReady,
}

impl Readiness {
    pub fn as_str(self) -> &'static str {
        match self {
            Readiness::Ready => "ready",
            Readiness::Conditional => "conditional",
            Readiness::NotReady => "not_ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub tested_exercises: usize,
    pub total_exercises: usize,
    pub coverage: f64,
    pub defect_penalty: f64,
    pub defects: f64,
    pub reliability_checks_total: usize,
    pub reliability_checks_passed: usize,
    pub reliability: f64,
    pub quality_score: f64,
    pub readiness: Readiness,
    pub bug_counts: BTreeMap<Severity, usize>,
}

impl QualityMetrics {
    /// Metrics for a run that produced no results.
    pub fn empty(total_exercises: usize) -> Self {
        compute_metrics(&[], total_exercises, &ScoringConfig::default())
    }
}

/// Compute course metrics from per-exercise results.
///
/// `total_exercises` includes exercises that exist but were not tested.
/// When no reliability checks ran, Reliability contributes nothing.
pub fn compute_metrics(
    results: &[ExerciseTestResults],
    total_exercises: usize,
    config: &ScoringConfig,
) -> QualityMetrics {
    let tested_exercises = results.iter().filter(|r| r.was_tested()).count();
    let coverage = ratio(tested_exercises, total_exercises) * COVERAGE_POINTS;

    let mut bug_counts: BTreeMap<Severity, usize> = Severity::ALL.iter().map(|s| (*s, 0)).collect();
    let mut weight_sum = 0.0;
    for bug in results.iter().flat_map(|r| r.bugs()) {
        *bug_counts.entry(bug.severity).or_default() += 1;
        weight_sum += config.weights.weight(bug.severity);
    }
    let defect_penalty = weight_sum.min(DEFECT_POINTS);
    let defects = (DEFECT_POINTS - defect_penalty).max(0.0);

    let reliability_results: Vec<_> = results
        .iter()
        .flat_map(|r| r.phase_results.iter())
        .filter(|t| config.reliability_categories.iter().any(|c| c == &t.category))
        .collect();
    let reliability_checks_total = reliability_results.len();
    let reliability_checks_passed = reliability_results.iter().filter(|t| t.passed).count();
    let reliability = ratio(reliability_checks_passed, reliability_checks_total) * RELIABILITY_POINTS;

    let quality_score = (coverage + defects + reliability).clamp(0.0, 100.0);
    let readiness = readiness(
        quality_score,
        bug_counts.get(&Severity::P0).copied().unwrap_or(0) > 0,
        config,
    );

    QualityMetrics {
        tested_exercises,
        total_exercises,
        coverage,
        defect_penalty,
        defects,
        reliability_checks_total,
        reliability_checks_passed,
        reliability,
        quality_score,
        readiness,
        bug_counts,
    }
}

/// Map a score to release readiness. Any P0 forces `NotReady`.
pub fn readiness(score: f64, has_p0: bool, config: &ScoringConfig) -> Readiness {
    if has_p0 {
        Readiness::NotReady
    } else if score >= config.ready_threshold {
        Readiness::Ready
    } else if score >= config.conditional_threshold {
        Readiness::Conditional
    } else {
        Readiness::NotReady
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
