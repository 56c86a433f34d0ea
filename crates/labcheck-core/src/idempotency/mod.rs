//! Idempotency engine: repeated lifecycle cycles with post-teardown diffs.
//!
//! # Modules
//!
//! - [`snapshot`] — `StateSnapshot`, `HostState`, probe configuration
//! - [`normalize`] — `Normalizer` (volatile-field masking)
//! - [`diff`] — `SnapshotDiff`, `diff_snapshots()`
//!
//! Cycle 1's post-teardown snapshot is the baseline; every later cycle's
//! post-teardown snapshot is compared against it. Snapshots taken while an
//! exercise is still set up are never compared.

pub mod diff;
pub mod normalize;
pub mod snapshot;

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::context::CancelFlag;
use crate::domain::ExerciseContext;
use crate::lifecycle::{LifecyclePlan, LifecycleRunner, MarkerSet, StepFailure};
use crate::pool::ConnectionPool;

pub use diff::{diff_snapshots, SnapshotDiff};
pub use normalize::{default_volatile_patterns, Normalizer, VOLATILE};
pub use snapshot::{HostState, ProbeSet, ResourceKind, SnapshotProbes, StateSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Lifecycle cycles per exercise. Fewer than 2 disables the check.
    pub cycles: u32,
    pub volatile_patterns: Vec<String>,
    pub probes: SnapshotProbes,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            cycles: 2,
            volatile_patterns: default_volatile_patterns(),
            probes: SnapshotProbes::default(),
        }
    }
}

/// A snapshot discrepancy first observed in `cycle`.
#[derive(Debug, Clone)]
pub struct CycleDiff {
    pub cycle: u32,
    pub diff: SnapshotDiff,
}

/// A lifecycle command that succeeded in cycle 1 but failed in `cycle`.
#[derive(Debug, Clone)]
pub struct Regression {
    pub cycle: u32,
    pub failure: StepFailure,
}

#[derive(Debug, Clone, Default)]
pub struct IdempotencyResult {
    pub cycles_completed: u32,
    /// At most one entry per (host, resource kind): the first cycle it diverged.
    pub diffs: Vec<CycleDiff>,
    pub regressions: Vec<Regression>,
    /// Set when a target became unreachable; remaining cycles were skipped.
    pub blocked: Option<String>,
    pub cancelled: bool,
}

impl IdempotencyResult {
    pub fn is_idempotent(&self) -> bool {
        self.diffs.is_empty() && self.regressions.is_empty()
    }
}

/// Runs an exercise lifecycle repeatedly through the pool.
pub struct IdempotencyEngine<'a> {
    pool: &'a ConnectionPool,
    markers: &'a MarkerSet,
    normalizer: &'a Normalizer,
    probes: &'a SnapshotProbes,
    default_timeout: Duration,
}

impl<'a> IdempotencyEngine<'a> {
    pub fn new(
        pool: &'a ConnectionPool,
        markers: &'a MarkerSet,
        normalizer: &'a Normalizer,
        probes: &'a SnapshotProbes,
        default_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            markers,
            normalizer,
            probes,
            default_timeout,
        }
    }

    /// Execute `n` full lifecycle cycles strictly in sequence.
    #[instrument(skip(self, exercise, cancel), fields(exercise_id = %exercise.id))]
    pub async fn run_cycles(
        &self,
        exercise: &ExerciseContext,
        n: u32,
        cancel: &CancelFlag,
    ) -> IdempotencyResult {
        let runner = LifecycleRunner::new(self.pool, exercise, self.markers, self.default_timeout);
        let mut result = IdempotencyResult::default();
        let mut baseline: Option<StateSnapshot> = None;
        let mut first_cycle_ok: HashSet<String> = HashSet::new();
        let mut seen: HashSet<(String, ResourceKind)> = HashSet::new();

        for cycle in 1..=n {
            if cancel.is_cancelled() {
                warn!(cycle, "cancelled between idempotency cycles");
                result.cancelled = true;
                break;
            }

            let report = runner.run(LifecyclePlan::FULL).await;
            if let Some(lost) = report.failures.iter().find(|f| f.blocked) {
                result.blocked = Some(lost.reason.clone());
                break;
            }

            if cycle == 1 {
                first_cycle_ok.extend(report.succeeded.iter().cloned());
            } else {
                result.regressions.extend(
                    report
                        .failures
                        .into_iter()
                        .filter(|f| first_cycle_ok.contains(&f.key()))
                        .map(|failure| Regression { cycle, failure }),
                );
            }

            let snapshot =
                match StateSnapshot::capture(self.pool, exercise, self.probes, self.normalizer).await {
                    Ok(s) => s,
                    Err(e) => {
                        result.blocked = Some(e.to_string());
                        break;
                    }
                };
            result.cycles_completed = cycle;

            let Some(base) = &baseline else {
                baseline = Some(snapshot);
                continue;
            };
            for diff in diff_snapshots(base, &snapshot) {
                if seen.insert((diff.host.clone(), diff.resource)) {
                    result.diffs.push(CycleDiff { cycle, diff });
                }
            }
        }

        info!(
            cycles = result.cycles_completed,
            diffs = result.diffs.len(),
            regressions = result.regressions.len(),
            "idempotency cycles finished"
        );
        result
    }
}
