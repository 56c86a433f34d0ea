//! Phase 2: a lab's grader must not pass an unsolved exercise.

use async_trait::async_trait;

use super::{BugCollector, Check, CheckContext};
use crate::domain::{ExerciseType, Severity, TestResult};
use crate::lifecycle::{GradeVerdict, LifecyclePlan};

pub struct NegativeGradingCheck;

#[async_trait]
impl Check for NegativeGradingCheck {
    fn name(&self) -> &str {
        "grading_negative"
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn run(&self, cx: &CheckContext<'_>) -> TestResult {
        let exercise = cx.exercise;
        let mut c = BugCollector::new(self.name(), &exercise.id);

        if exercise.exercise_type != ExerciseType::Lab || exercise.grading_ref.is_none() {
            c.detail("skipped", true);
            return c.finish();
        }

        let report = cx.lifecycle().run(LifecyclePlan::UNSOLVED).await;
        let (lost, _): (Vec<_>, Vec<_>) = report.failures.into_iter().partition(|f| f.blocked);
        if !lost.is_empty() {
            c.step_failures(lost);
            return c.finish();
        }

        match report.grade.map(|g| (g.verdict, g.output)) {
            Some((GradeVerdict::Pass, output)) => {
                c.detail("grade", "pass");
                c.push(
                    c.bug(Severity::P1, "grader passes a lab whose solution was never applied")
                        .with_fix("Make the grader verify the outcome the lab asks for")
                        .with_evidence(output)
                        .with_verification_step("Run setup, then grade without solving"),
                );
            }
            Some((GradeVerdict::Fail { .. }, _)) => c.detail("grade", "fail"),
            Some((GradeVerdict::Indeterminate, _)) => c.detail("grade", "indeterminate"),
            None => c.detail("grade", "not_run"),
        }
        c.finish()
    }
}
