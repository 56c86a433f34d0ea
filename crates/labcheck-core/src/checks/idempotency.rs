//! Phase 2: repeated lifecycle cycles must converge to the same end state.

use async_trait::async_trait;

use super::{BugCollector, Check, CheckContext};
use crate::domain::{Severity, TestResult};
use crate::idempotency::IdempotencyEngine;

pub struct IdempotencyCheck;

#[async_trait]
impl Check for IdempotencyCheck {
    fn name(&self) -> &str {
        "idempotency"
    }

    async fn run(&self, cx: &CheckContext<'_>) -> TestResult {
        let exercise = cx.exercise;
        let config = &cx.run.config.idempotency;
        let mut c = BugCollector::new(self.name(), &exercise.id);

        if config.cycles < 2 {
            c.detail("skipped", true);
            c.detail("cycles", config.cycles);
            return c.finish();
        }

        let engine = IdempotencyEngine::new(
            cx.pool,
            &cx.run.markers,
            &cx.run.normalizer,
            &config.probes,
            cx.run.command_timeout(),
        );
        let outcome = engine.run_cycles(exercise, config.cycles, &cx.run.cancel).await;
        c.detail("cycles", outcome.cycles_completed);
        if outcome.cancelled {
            c.detail("cancelled", true);
        }

        for cd in &outcome.diffs {
            c.push(
                c.bug(
                    Severity::P1,
                    format!(
                        "state pollution: {} on {} differ after cycle {}",
                        cd.diff.resource, cd.diff.host, cd.cycle
                    ),
                )
                .with_fix("Make setup and teardown converge to the same end state on every run")
                .with_evidence(cd.diff.evidence()),
            );
        }

        for r in &outcome.regressions {
            let f = &r.failure;
            c.push(
                c.bug(
                    Severity::P1,
                    format!(
                        "non-idempotent {} command `{}` on {}: succeeded in cycle 1, failed in cycle {}",
                        f.step, f.command, f.target, r.cycle
                    ),
                )
                .with_fix("Make the command safe to run repeatedly")
                .with_evidence(f.evidence.clone()),
            );
        }

        if let Some(reason) = outcome.blocked {
            c.block(
                c.bug(Severity::P0, "target lost during idempotency cycles")
                    .with_evidence(reason),
            );
        }
        c.finish()
    }
}
