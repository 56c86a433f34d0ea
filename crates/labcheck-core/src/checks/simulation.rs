//! Phase 1: simulate the full lifecycle the way a student would.

use async_trait::async_trait;

use super::{BugCollector, Check, CheckContext};
use crate::domain::{ExerciseType, Severity, TestResult};
use crate::lifecycle::{GradeVerdict, LifecyclePlan};

pub struct LifecycleCheck;

#[async_trait]
impl Check for LifecycleCheck {
    fn name(&self) -> &str {
        "lifecycle"
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn run(&self, cx: &CheckContext<'_>) -> TestResult {
        let exercise = cx.exercise;
        let mut c = BugCollector::new(self.name(), &exercise.id);

        if exercise.exercise_type == ExerciseType::Lab && exercise.grading_ref.is_none() {
            c.push(
                c.bug(Severity::P2, "lab has no grading script")
                    .with_fix("Provide a gradingRef for the lab"),
            );
        }

        let report = cx.lifecycle().run(LifecyclePlan::FULL).await;
        c.detail("steps_succeeded", report.succeeded.len());

        if let Some(grade) = &report.grade {
            c.detail("grader_exit_code", grade.exit_code);
            match &grade.verdict {
                GradeVerdict::Pass => c.detail("grade", "pass"),
                GradeVerdict::Fail { failing_lines } => {
                    c.detail("grade", "fail");
                    for line in failing_lines {
                        c.push(
                            c.bug(Severity::P1, format!("grader reports failure after solution: {line}"))
                                .with_fix("Align the solution with what the grader verifies")
                                .with_evidence(grade.output.clone()),
                        );
                    }
                }
                GradeVerdict::Indeterminate => {
                    c.detail("grade", "indeterminate");
                    c.push(
                        c.bug(Severity::P2, "grader output contains no PASS/FAIL markers")
                            .with_fix("Emit structured PASS/FAIL lines from the grading script")
                            .with_evidence(format!(
                                "exit code {}\n{}",
                                grade.exit_code, grade.output
                            )),
                    );
                }
            }
        }

        c.step_failures(report.failures);
        c.finish()
    }
}
