//! Course-level orchestration.
//!
//! Exercises are spread over a bounded worker pool. Each worker runs Phase 1
//! then Phase 2 checks for one exercise, sequentially and in registration
//! order. Results are merged in completion order.
//!
//! Isolation: a `blocked` result stops the rest of its phase (and Phase 2)
//! for that exercise only. A panicking worker turns into a single P0 Bug for
//! its exercise; the run itself always completes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use crate::cache::{Fingerprint, FsResultCache, ResultCache};
use crate::checks::{Check, CheckContext, CheckRegistry, Phase};
use crate::config::RunConfig;
use crate::context::{CancelFlag, RunContext};
use crate::counters::COUNTERS;
use crate::domain::{
    Bug, CourseContext, CourseTestResults, ExerciseContext, ExerciseTestResults,
    OrchestrationError, Result, Severity, TestResult,
};
use crate::executor::RemoteExecutor;
use crate::obs;
use crate::pool::ConnectionPool;
use crate::scoring::compute_metrics;

/// Category of the Bug recorded for a crashed worker.
pub const ORCHESTRATOR_CATEGORY: &str = "orchestrator";

pub struct Orchestrator {
    registry: Arc<CheckRegistry>,
    pool: Arc<ConnectionPool>,
    cache: Option<Arc<dyn ResultCache>>,
    config: Arc<RunConfig>,
}

impl Orchestrator {
    pub fn new(
        registry: CheckRegistry,
        pool: Arc<ConnectionPool>,
        cache: Option<Arc<dyn ResultCache>>,
        config: RunConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            pool,
            cache,
            config: Arc::new(config),
        }
    }

    /// Standard checks, a pool over `executor`, and the on-disk cache when
    /// enabled. A cache directory that cannot be opened disables caching.
    pub fn from_config(executor: Arc<dyn RemoteExecutor>, config: RunConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(ConnectionPool::new(executor, config.pool_config()));

        let cache: Option<Arc<dyn ResultCache>> = if config.cache.enabled {
            match FsResultCache::new(&config.cache.dir) {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    warn!(dir = %config.cache.dir.display(), error = %e, "result cache unavailable, running uncached");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::new(CheckRegistry::standard(), pool, cache, config))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run every exercise of `course`.
    ///
    /// Fails only on invalid input or configuration; exercise defects are
    /// reported inside the returned tree.
    pub async fn run(&self, course: &CourseContext, cancel: CancelFlag) -> Result<CourseTestResults> {
        self.run_only(course, &[], cancel).await
    }

    /// Run only the exercises named in `only` (every exercise when empty).
    ///
    /// The rest of the course still counts towards coverage and still
    /// resolves `dependsOn` references.
    pub async fn run_only(
        &self,
        course: &CourseContext,
        only: &[String],
        cancel: CancelFlag,
    ) -> Result<CourseTestResults> {
        self.config.validate()?;
        validate_course(course)?;
        let selected = select_exercises(course, only)?;

        let ctx = Arc::new(RunContext::new(course, Arc::clone(&self.config), cancel)?);
        let span = obs::run_span(&ctx.run_id.to_string(), &course.course_id);
        self.run_course(course, selected, ctx).instrument(span).await
    }

    async fn run_course(
        &self,
        course: &CourseContext,
        selected: Vec<&ExerciseContext>,
        ctx: Arc<RunContext>,
    ) -> Result<CourseTestResults> {
        let started = Instant::now();
        let run_id = ctx.run_id.to_string();
        obs::emit_run_started(&run_id, &course.course_id, selected.len(), self.config.parallelism);

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let mut workers = FuturesUnordered::new();

        for exercise in selected {
            let exercise = exercise.clone();
            let exercise_id = exercise.id.clone();
            let registry = Arc::clone(&self.registry);
            let pool = Arc::clone(&self.pool);
            let cache = self.cache.clone();
            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            let span = obs::exercise_span(&exercise.id);

            let handle = tokio::spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    if ctx.cancel.is_cancelled() {
                        debug!("cancelled before start");
                        return None;
                    }
                    Some(run_exercise(&exercise, &registry, &pool, cache.as_deref(), &ctx).await)
                }
                .instrument(span),
            );
            workers.push(async move { (exercise_id, handle.await) });
        }

        let mut exercise_results = Vec::with_capacity(workers.len());
        while let Some((exercise_id, joined)) = workers.next().await {
            let results = match joined {
                Ok(Some(results)) => results,
                Ok(None) => continue,
                Err(e) => {
                    error!(exercise_id = %exercise_id, error = %e, "exercise worker crashed");
                    crashed_worker(&exercise_id, &e.to_string())
                }
            };
            obs::emit_exercise_finished(
                &results.exercise_id,
                results.overall_passed,
                results.total_bugs(),
                results.blocked_at.as_deref(),
            );
            exercise_results.push(results);
        }

        self.pool.evict_all().await;

        let metrics = compute_metrics(&exercise_results, course.total_exercises(), &self.config.scoring);
        let cancelled = ctx.cancel.is_cancelled();
        COUNTERS.flush();
        obs::emit_run_finished(
            &run_id,
            started.elapsed().as_millis() as u64,
            metrics.quality_score,
            metrics.readiness.as_str(),
            cancelled,
        );

        Ok(CourseTestResults {
            run_id: ctx.run_id,
            course_id: course.course_id.clone(),
            exercise_results,
            metrics,
            generated_at: Utc::now(),
            cancelled,
        })
    }
}

fn validate_course(course: &CourseContext) -> Result<()> {
    if course.exercises.is_empty() {
        return Err(OrchestrationError::NoExercises {
            course_id: course.course_id.clone(),
        });
    }
    let mut seen = HashSet::new();
    for exercise in &course.exercises {
        if exercise.id.trim().is_empty() {
            return Err(OrchestrationError::InvalidCourse(
                "exercise with empty id".to_string(),
            ));
        }
        if !seen.insert(exercise.id.as_str()) {
            return Err(OrchestrationError::InvalidCourse(format!(
                "duplicate exercise id `{}`",
                exercise.id
            )));
        }
    }
    Ok(())
}

fn select_exercises<'c>(course: &'c CourseContext, only: &[String]) -> Result<Vec<&'c ExerciseContext>> {
    if let Some(missing) = only.iter().find(|id| course.exercises.iter().all(|e| &e.id != *id)) {
        return Err(OrchestrationError::InvalidCourse(format!(
            "exercise `{missing}` is not part of course {}",
            course.course_id
        )));
    }
    Ok(course
        .exercises
        .iter()
        .filter(|e| only.is_empty() || only.contains(&e.id))
        .collect())
}

/// Run both phases for one exercise.
async fn run_exercise(
    exercise: &ExerciseContext,
    registry: &CheckRegistry,
    pool: &ConnectionPool,
    cache: Option<&dyn ResultCache>,
    ctx: &RunContext,
) -> ExerciseTestResults {
    let cx = CheckContext::new(exercise, pool, ctx);
    let stop_on_blocker = ctx.config.stop_on_blocker;
    let mut results = Vec::new();
    let mut blocked_at: Option<String> = None;

    'phases: for phase in [Phase::Simulation, Phase::Validation] {
        if blocked_at.is_some() && stop_on_blocker {
            debug!(%phase, "skipped after blocker");
            break;
        }
        for check in registry.checks(phase) {
            if ctx.cancel.is_cancelled() {
                info!(%phase, check = check.name(), "cancelled, not starting further checks");
                break 'phases;
            }

            let result = run_check(check.as_ref(), &cx, cache).await;
            obs::emit_check_finished(
                &exercise.id,
                check.name(),
                result.passed,
                result.bugs.len(),
                result.duration_ms,
            );

            let blocked = result.is_blocked();
            results.push(result);
            if blocked {
                blocked_at.get_or_insert_with(|| check.name().to_string());
                if stop_on_blocker {
                    warn!(%phase, check = check.name(), "blocked, skipping rest of phase");
                    break;
                }
            }
        }
    }

    ExerciseTestResults::new(exercise.id.clone(), results, blocked_at)
}

/// Run one check, consulting the cache for cacheable checks.
///
/// Exercises without a content version are never cached since a change
/// could not be detected.
async fn run_check(check: &dyn Check, cx: &CheckContext<'_>, cache: Option<&dyn ResultCache>) -> TestResult {
    let exercise = cx.exercise;
    let cache = cache.filter(|_| check.cacheable() && !exercise.content_version.is_empty());
    let fingerprint = Fingerprint::compute(&exercise.id, &exercise.content_version, check.name());

    if let Some(cache) = cache {
        if let Some(entry) = cache.lookup(&fingerprint) {
            COUNTERS.inc_cache_hits();
            obs::emit_cache_hit(&exercise.id, check.name(), &fingerprint.to_hex());
            return entry.result;
        }
    }

    COUNTERS.inc_checks_executed();
    let result = check.run(cx).await;

    if let Some(cache) = cache {
        if result.passed {
            if let Err(e) = cache.store(&fingerprint, &result) {
                warn!(check = check.name(), error = %e, "failed to store result in cache");
            }
        }
    }
    result
}

fn crashed_worker(exercise_id: &str, reason: &str) -> ExerciseTestResults {
    let bug = Bug::new(
        format!("ORCHESTRATOR-{exercise_id}-001"),
        Severity::P0,
        ORCHESTRATOR_CATEGORY,
        exercise_id,
        "exercise worker crashed before completing its checks",
    )
    .with_evidence(reason)
    .with_fix("Inspect the run log for the panic message and fix the failing check");

    let result = TestResult::new(ORCHESTRATOR_CATEGORY, exercise_id, vec![bug], 0);
    ExerciseTestResults::new(exercise_id, vec![result], None)
}
