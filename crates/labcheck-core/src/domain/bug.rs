//! Bugs and their severities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Defect severity.
///
/// `P0` and `P1` fail the owning `TestResult`; `ENV` marks problems in the
/// lab environment rather than in the exercise content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
    #[serde(rename = "ENV")]
    Env,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::P0,
        Severity::P1,
        Severity::P2,
        Severity::P3,
        Severity::Env,
    ];

    /// Whether a bug of this severity makes its result fail.
    pub fn is_failing(self) -> bool {
        matches!(self, Severity::P0 | Severity::P1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::P0 => "P0",
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
            Severity::Env => "ENV",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A defect discovered while checking an exercise.
///
/// Built once with the `with_*` methods and then moved into a `TestResult`;
/// nothing mutates a bug after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bug {
    pub id: String,
    pub severity: Severity,
    pub category: String,
    pub exercise_id: String,
    pub description: String,
    pub fix_recommendation: String,
    pub evidence: String,
    pub verification_steps: Vec<String>,
}

impl Bug {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        category: impl Into<String>,
        exercise_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            category: category.into(),
            exercise_id: exercise_id.into(),
            description: description.into(),
            fix_recommendation: String::new(),
            evidence: String::new(),
            verification_steps: Vec::new(),
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix_recommendation = fix.into();
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn with_verification_step(mut self, step: impl Into<String>) -> Self {
        self.verification_steps.push(step.into());
        self
    }
}
