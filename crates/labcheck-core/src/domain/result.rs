//! Check results and the course-level result tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::bug::{Bug, Severity};
use crate::scoring::QualityMetrics;

/// Detail key a check sets to halt the remaining checks of its phase.
pub const BLOCKED_DETAIL: &str = "blocked";

/// Outcome of a single check against a single exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Check name, e.g. "lifecycle" or "idempotency".
    pub category: String,

    pub exercise_id: String,

    /// True when no contained bug is P0 or P1.
    pub passed: bool,

    pub bugs: Vec<Bug>,

    pub duration_ms: u64,

    /// Free-form check details. `blocked = true` halts the phase.
    pub details: Map<String, Value>,
}

impl TestResult {
    /// Create a result; `passed` is derived from `bugs`.
    pub fn new(
        category: impl Into<String>,
        exercise_id: impl Into<String>,
        bugs: Vec<Bug>,
        duration_ms: u64,
    ) -> Self {
        let passed = !bugs.iter().any(|b| b.severity.is_failing());
        Self {
            category: category.into(),
            exercise_id: exercise_id.into(),
            passed,
            bugs,
            duration_ms,
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Whether the check asked the orchestrator to skip the rest of the phase.
    pub fn is_blocked(&self) -> bool {
        self.details
            .get(BLOCKED_DETAIL)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn count_severity(&self, severity: Severity) -> usize {
        self.bugs.iter().filter(|b| b.severity == severity).count()
    }
}

/// All results for one exercise, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseTestResults {
    pub exercise_id: String,
    pub phase_results: Vec<TestResult>,
    pub overall_passed: bool,
    /// Name of the check that blocked, if any.
    pub blocked_at: Option<String>,
}

impl ExerciseTestResults {
    pub fn new(
        exercise_id: impl Into<String>,
        phase_results: Vec<TestResult>,
        blocked_at: Option<String>,
    ) -> Self {
        let overall_passed = phase_results
            .iter()
            .flat_map(|r| r.bugs.iter())
            .all(|b| !b.severity.is_failing());
        Self {
            exercise_id: exercise_id.into(),
            phase_results,
            overall_passed,
            blocked_at,
        }
    }

    pub fn bugs(&self) -> impl Iterator<Item = &Bug> {
        self.phase_results.iter().flat_map(|r| r.bugs.iter())
    }

    pub fn total_bugs(&self) -> usize {
        self.phase_results.iter().map(|r| r.bugs.len()).sum()
    }

    /// An exercise counts as tested once at least one check produced a result.
    pub fn was_tested(&self) -> bool {
        !self.phase_results.is_empty()
    }

    pub fn result(&self, category: &str) -> Option<&TestResult> {
        self.phase_results.iter().find(|r| r.category == category)
    }
}

/// The course-level result tree consumed by report generators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseTestResults {
    pub run_id: Uuid,
    pub course_id: String,
    /// In completion order, not submission order.
    pub exercise_results: Vec<ExerciseTestResults>,
    pub metrics: QualityMetrics,
    pub generated_at: DateTime<Utc>,
    /// True when the run stopped early on cancellation.
    pub cancelled: bool,
}

impl CourseTestResults {
    /// Process-level failure signal: any P0 bug anywhere.
    pub fn has_p0(&self) -> bool {
        self.exercise_results
            .iter()
            .flat_map(|e| e.bugs())
            .any(|b| b.severity == Severity::P0)
    }

    pub fn exercise(&self, exercise_id: &str) -> Option<&ExerciseTestResults> {
        self.exercise_results
            .iter()
            .find(|e| e.exercise_id == exercise_id)
    }

    pub fn total_bugs(&self) -> usize {
        self.exercise_results.iter().map(|e| e.total_bugs()).sum()
    }
}
