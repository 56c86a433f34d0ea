//! Run-scoped context threaded through orchestrator, checks and pool users.
//!
//! There is no process-global "active course": everything a check needs to
//! know about the run travels in a [`RunContext`], so concurrent runs in one
//! process cannot observe each other.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::RunConfig;
use crate::domain::{CourseContext, OrchestrationError, Result};
use crate::idempotency::Normalizer;
use crate::lifecycle::MarkerSet;

/// Cooperative cancellation flag shared by every worker of a run.
///
/// Checked between exercises, phases and checks. In-flight remote commands
/// are left to finish on their own.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub course_id: String,
    /// Every exercise id in the course descriptor.
    pub known_exercises: BTreeSet<String>,
    pub config: Arc<RunConfig>,
    pub cancel: CancelFlag,
    /// Grader output markers, compiled once per run.
    pub markers: Arc<MarkerSet>,
    /// Snapshot normalizer built from the configured volatile patterns.
    pub normalizer: Arc<Normalizer>,
}

impl RunContext {
    /// Build the context for one run, compiling every configured pattern.
    pub fn new(course: &CourseContext, config: Arc<RunConfig>, cancel: CancelFlag) -> Result<Self> {
        let markers = MarkerSet::compile(&config.grading)
            .map_err(|e| OrchestrationError::InvalidConfig(format!("grading pattern: {e}")))?;
        let normalizer = Normalizer::new(&config.idempotency.volatile_patterns)
            .map_err(|e| OrchestrationError::InvalidConfig(format!("volatile pattern: {e}")))?;

        Ok(Self {
            run_id: Uuid::new_v4(),
            course_id: course.course_id.clone(),
            known_exercises: course.exercises.iter().map(|e| e.id.clone()).collect(),
            config,
            cancel,
            markers: Arc::new(markers),
            normalizer: Arc::new(normalizer),
        })
    }

    /// Base timeout for lifecycle commands that do not set their own.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn context_lists_known_exercises() {
        use crate::domain::{ExerciseContext, ExerciseType};

        let course = CourseContext {
            course_id: "rh124".to_string(),
            exercises: vec![
                ExerciseContext::new("alpha", ExerciseType::GuidedExercise),
                ExerciseContext::new("beta", ExerciseType::Lab),
            ],
            total_exercises: None,
        };
        let ctx = RunContext::new(&course, Arc::new(RunConfig::default()), CancelFlag::new()).unwrap();
        assert_eq!(ctx.course_id, "rh124");
        assert!(ctx.known_exercises.contains("beta"));
        assert_eq!(ctx.command_timeout(), Duration::from_secs(300));
    }
}
