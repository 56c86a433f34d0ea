//! Phase 1: `dependsOn` must reference other exercises of the course.
//!
//! Not cacheable: the verdict depends on the rest of the course, which the
//! cache fingerprint does not cover.

use async_trait::async_trait;

use super::{BugCollector, Check, CheckContext};
use crate::domain::{Severity, TestResult};

pub struct DependencyCheck;

#[async_trait]
impl Check for DependencyCheck {
    fn name(&self) -> &str {
        "dependencies"
    }

    async fn run(&self, cx: &CheckContext<'_>) -> TestResult {
        let exercise = cx.exercise;
        let mut c = BugCollector::new(self.name(), &exercise.id);

        for dep in &exercise.depends_on {
            if dep == &exercise.id {
                c.push(
                    c.bug(Severity::P2, "exercise depends on itself")
                        .with_fix(format!("Remove `{dep}` from dependsOn")),
                );
            } else if !cx.run.known_exercises.contains(dep) {
                c.push(
                    c.bug(Severity::P2, format!("dependency `{dep}` is not part of the course"))
                        .with_fix("Reference an exercise id that exists in the course")
                        .with_evidence(format!("course {} has no exercise `{dep}`", cx.run.course_id)),
                );
            }
        }
        c.detail("dependencies", exercise.depends_on.len());
        c.finish()
    }
}
