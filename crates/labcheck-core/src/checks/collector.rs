//! Error-summary accumulator used by every check.

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::domain::{Bug, Severity, TestResult, BLOCKED_DETAIL};
use crate::lifecycle::StepFailure;

/// Collects every defect a check finds, then builds its [`TestResult`].
pub struct BugCollector {
    category: String,
    exercise_id: String,
    bugs: Vec<Bug>,
    details: Map<String, Value>,
    blocked: bool,
    started: Instant,
}

impl BugCollector {
    pub fn new(category: &str, exercise_id: &str) -> Self {
        Self {
            category: category.to_string(),
            exercise_id: exercise_id.to_string(),
            bugs: Vec::new(),
            details: Map::new(),
            blocked: false,
            started: Instant::now(),
        }
    }

    /// Next bug id, e.g. `CLEANUP-alpha-002`.
    pub fn next_id(&self) -> String {
        format!(
            "{}-{}-{:03}",
            self.category.to_uppercase(),
            self.exercise_id,
            self.bugs.len() + 1
        )
    }

    /// Start a bug with this collector's id, category and exercise.
    pub fn bug(&self, severity: Severity, description: impl Into<String>) -> Bug {
        Bug::new(
            self.next_id(),
            severity,
            self.category.clone(),
            self.exercise_id.clone(),
            description,
        )
    }

    pub fn push(&mut self, bug: Bug) {
        self.bugs.push(bug);
    }

    /// Record the bug that makes further checking meaningless.
    pub fn block(&mut self, bug: Bug) {
        self.blocked = true;
        self.bugs.push(bug);
    }

    /// Record lifecycle step failures, blocking on a lost target.
    pub fn step_failures(&mut self, failures: Vec<StepFailure>) {
        for failure in failures {
            let blocked = failure.blocked;
            let bug = failure.into_bug(self.next_id(), &self.category, &self.exercise_id);
            if blocked {
                self.block(bug);
            } else {
                self.push(bug);
            }
        }
    }

    pub fn detail(&mut self, key: &str, value: impl Into<Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn finish(mut self) -> TestResult {
        if self.blocked {
            self.details.insert(BLOCKED_DETAIL.to_string(), Value::Bool(true));
        }
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let mut result = TestResult::new(self.category, self.exercise_id, self.bugs, duration_ms);
        result.details = self.details;
        result
    }
}
