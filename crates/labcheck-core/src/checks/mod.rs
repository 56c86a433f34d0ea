//! Check framework and built-in checks.
//!
//! # Modules
//!
//! - [`collector`] — `BugCollector`, the error-summary accumulator
//! - [`registry`] — `CheckRegistry` with the two ordered phases
//! - [`connectivity`], [`dependencies`], [`simulation`] — Phase 1
//! - [`cleanup`], [`idempotency`], [`grading`] — Phase 2
//!
//! A check attempts every independent sub-validation and returns all defects
//! in one [`TestResult`]. It never panics or returns an error to signal a
//! validation failure. The only short-circuit allowed is a lost target, which
//! yields exactly one P0 Bug and `details.blocked = true`.

pub mod cleanup;
pub mod collector;
pub mod connectivity;
pub mod dependencies;
pub mod grading;
pub mod idempotency;
pub mod registry;
pub mod simulation;

use std::fmt;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::domain::{ExerciseContext, TestResult};
use crate::lifecycle::LifecycleRunner;
use crate::pool::ConnectionPool;

pub use cleanup::CleanupCheck;
pub use collector::BugCollector;
pub use connectivity::ConnectivityCheck;
pub use dependencies::DependencyCheck;
pub use grading::NegativeGradingCheck;
pub use idempotency::IdempotencyCheck;
pub use registry::CheckRegistry;
pub use simulation::LifecycleCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Phase 1.
    Simulation,
    /// Phase 2. Skipped when Phase 1 ends blocked.
    Validation,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Simulation => "simulation",
            Phase::Validation => "validation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a check may use while examining one exercise.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    pub exercise: &'a ExerciseContext,
    pub pool: &'a ConnectionPool,
    pub run: &'a RunContext,
}

impl<'a> CheckContext<'a> {
    pub fn new(exercise: &'a ExerciseContext, pool: &'a ConnectionPool, run: &'a RunContext) -> Self {
        Self { exercise, pool, run }
    }

    pub fn lifecycle(&self) -> LifecycleRunner<'a> {
        LifecycleRunner::new(
            self.pool,
            self.exercise,
            &self.run.markers,
            self.run.command_timeout(),
        )
    }
}

/// A pluggable validation run against one exercise.
#[async_trait]
pub trait Check: Send + Sync {
    /// Unique name, also used as the result category.
    fn name(&self) -> &str;

    /// Whether a passing result may be reused while content is unchanged.
    fn cacheable(&self) -> bool {
        false
    }

    async fn run(&self, cx: &CheckContext<'_>) -> TestResult;
}
