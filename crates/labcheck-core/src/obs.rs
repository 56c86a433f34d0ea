//! Structured observability hooks for run lifecycle events.
//!
//! This module provides:
//! - Run- and exercise-scoped tracing spans
//! - Emission functions for run start/finish, per-check and per-exercise
//!   completion, cache hits and cache corruption

use tracing::{info, warn};

/// Span covering one orchestrator run. Attach with `Instrument::instrument`.
pub fn run_span(run_id: &str, course_id: &str) -> tracing::Span {
    tracing::info_span!("labcheck.run", run_id = %run_id, course_id = %course_id)
}

/// Span covering one exercise worker.
pub fn exercise_span(exercise_id: &str) -> tracing::Span {
    tracing::info_span!("labcheck.exercise", exercise_id = %exercise_id)
}

pub fn emit_run_started(run_id: &str, course_id: &str, exercises: usize, parallelism: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        course_id = %course_id,
        exercises = exercises,
        parallelism = parallelism,
    );
}

pub fn emit_check_finished(exercise_id: &str, check: &str, passed: bool, bugs: usize, duration_ms: u64) {
    info!(
        event = "check.finished",
        exercise_id = %exercise_id,
        check = %check,
        passed = passed,
        bugs = bugs,
        duration_ms = duration_ms,
    );
}

pub fn emit_cache_hit(exercise_id: &str, check: &str, fingerprint: &str) {
    info!(event = "cache.hit", exercise_id = %exercise_id, check = %check, fingerprint = %fingerprint);
}

/// Warn-level: a cache entry could not be read and was discarded.
pub fn emit_cache_corruption(path: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "cache.corrupt", path = %path, reason = %reason, "treating as cache miss");
}

pub fn emit_exercise_finished(exercise_id: &str, passed: bool, bugs: usize, blocked_at: Option<&str>) {
    info!(
        event = "exercise.finished",
        exercise_id = %exercise_id,
        passed = passed,
        bugs = bugs,
        blocked_at = blocked_at.unwrap_or("-"),
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, quality_score: f64, readiness: &str, cancelled: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        quality_score = quality_score,
        readiness = %readiness,
        cancelled = cancelled,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_spans_create() {
        let _run = run_span("test-run-id", "rh124").entered();
        let _exercise = exercise_span("alpha").entered();
    }

    #[traced_test]
    #[test]
    fn test_run_lifecycle_events_are_logged() {
        emit_run_started("run-1", "rh124", 3, 2);
        emit_check_finished("alpha", "lifecycle", true, 0, 12);
        emit_exercise_finished("alpha", false, 2, Some("connectivity"));
        emit_run_finished("run-1", 5000, 87.5, "conditional", false);

        assert!(logs_contain("run.started"));
        assert!(logs_contain("check.finished"));
        assert!(logs_contain("blocked_at=connectivity"));
        assert!(logs_contain("quality_score=87.5"));
    }

    #[traced_test]
    #[test]
    fn test_cache_corruption_is_a_warning() {
        emit_cache_corruption("/tmp/cache/entries/ab/cd.json", &"expected value at line 1");
        assert!(logs_contain("WARN"));
        assert!(logs_contain("cache.corrupt"));
    }
}
