//! Phase 2: teardown must restore the state found before setup.

use async_trait::async_trait;

use super::{BugCollector, Check, CheckContext};
use crate::domain::{Severity, TestResult};
use crate::idempotency::{diff_snapshots, StateSnapshot};

pub struct CleanupCheck;

#[async_trait]
impl Check for CleanupCheck {
    fn name(&self) -> &str {
        "cleanup"
    }

    async fn run(&self, cx: &CheckContext<'_>) -> TestResult {
        let exercise = cx.exercise;
        let probes = &cx.run.config.idempotency.probes;
        let normalizer = &cx.run.normalizer;
        let mut c = BugCollector::new(self.name(), &exercise.id);

        let before = match StateSnapshot::capture(cx.pool, exercise, probes, normalizer).await {
            Ok(s) => s,
            Err(e) => {
                c.block(
                    c.bug(Severity::P0, "could not snapshot targets before setup")
                        .with_evidence(e.to_string()),
                );
                return c.finish();
            }
        };

        let runner = cx.lifecycle();
        let mut report = runner.setup().await;
        if !report.blocked() {
            let teardown = runner.teardown().await;
            report.failures.extend(teardown.failures);
        }

        // Setup and teardown failures are reported by the lifecycle check.
        let (lost, failed): (Vec<_>, Vec<_>) = report.failures.into_iter().partition(|f| f.blocked);
        c.detail("step_failures", failed.len());
        if !lost.is_empty() {
            c.step_failures(lost);
            return c.finish();
        }

        let after = match StateSnapshot::capture(cx.pool, exercise, probes, normalizer).await {
            Ok(s) => s,
            Err(e) => {
                c.block(
                    c.bug(Severity::P0, "could not snapshot targets after teardown")
                        .with_evidence(e.to_string()),
                );
                return c.finish();
            }
        };

        for diff in diff_snapshots(&before, &after) {
            c.push(
                c.bug(
                    Severity::P1,
                    format!("incomplete cleanup: {} on {} differ after teardown", diff.resource, diff.host),
                )
                .with_fix("Make teardown revert every change made by setup")
                .with_evidence(diff.evidence())
                .with_verification_step("Run setup then teardown and compare host state"),
            );
        }
        c.finish()
    }
}
