//! Orchestrator behaviour: phase sequencing, blocking, isolation, ordering,
//! crash containment, cancellation and result caching.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use labcheck_core::checks::DependencyCheck;
use labcheck_core::fakes::FakeExecutor;
use labcheck_core::{
    BugCollector, CancelFlag, Check, CheckContext, CheckRegistry, ConnectionPool, CourseContext,
    DeviceClass, ExerciseContext, ExerciseType, FsResultCache, OrchestrationError, Orchestrator,
    Phase, PoolConfig, Readiness, RemoteCommand, ResultCache, RunConfig, Severity, TargetSpec,
    TestResult,
};

// ---------------------------------------------------------------------------
// Scripted checks
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Behaviour {
    Bugs(&'static [Severity]),
    /// P0 + blocked, only for the named exercise.
    BlockOn(&'static str),
    PanicOn(&'static str),
    /// Sleep longer for the named exercise.
    SlowOn(&'static str),
    CancelRun,
}

struct Scripted {
    name: &'static str,
    behaviour: Behaviour,
    cacheable: bool,
    runs: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            cacheable: false,
            runs: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn cacheable(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            cacheable: true,
            runs: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Check for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    async fn run(&self, cx: &CheckContext<'_>) -> TestResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let id = cx.exercise.id.as_str();
        let mut c = BugCollector::new(self.name, id);

        match self.behaviour {
            Behaviour::Bugs(severities) => {
                for s in severities {
                    c.push(c.bug(*s, format!("{} defect", s)));
                }
            }
            Behaviour::BlockOn(target) if target == id => {
                c.block(c.bug(Severity::P0, "connectivity lost"));
            }
            Behaviour::PanicOn(target) if target == id => {
                panic!("check exploded on {id}");
            }
            Behaviour::SlowOn(target) => {
                let secs = if target == id { 10 } else { 1 };
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
            Behaviour::CancelRun => cx.run.cancel.cancel(),
            _ => {}
        }
        c.finish()
    }
}

fn course(ids: &[&str]) -> CourseContext {
    CourseContext {
        course_id: "rh124".to_string(),
        exercises: ids
            .iter()
            .map(|id| {
                let mut ex = ExerciseContext::new(*id, ExerciseType::GuidedExercise);
                ex.content_version = "v1".to_string();
                ex
            })
            .collect(),
        total_exercises: None,
    }
}

fn orchestrator(
    exec: &FakeExecutor,
    registry: CheckRegistry,
    cache: Option<Arc<dyn ResultCache>>,
    config: RunConfig,
) -> Orchestrator {
    let pool = Arc::new(ConnectionPool::new(Arc::new(exec.clone()), PoolConfig::default()));
    Orchestrator::new(registry, pool, cache, config)
}

fn registry(simulation: Vec<Arc<Scripted>>, validation: Vec<Arc<Scripted>>) -> CheckRegistry {
    let mut registry = CheckRegistry::new();
    for check in simulation {
        registry.register(Phase::Simulation, check).unwrap();
    }
    for check in validation {
        registry.register(Phase::Validation, check).unwrap();
    }
    registry
}

// ---------------------------------------------------------------------------
// Phase sequencing and blocking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn p2_bug_does_not_fail_exercise() {
    let check1 = Scripted::new("check1", Behaviour::Bugs(&[]));
    let check2 = Scripted::new("check2", Behaviour::Bugs(&[Severity::P2]));
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![check1, check2], vec![]),
        None,
        RunConfig::default(),
    );

    let results = orch.run(&course(&["alpha"]), CancelFlag::new()).await.unwrap();

    let alpha = results.exercise("alpha").unwrap();
    assert!(alpha.overall_passed);
    assert_eq!(alpha.total_bugs(), 1);
    assert_eq!(alpha.phase_results.len(), 2);
    assert!(!results.has_p0());
}

#[tokio::test]
async fn blocker_skips_rest_of_phase_and_validation() {
    let blocker = Scripted::new("connectivity", Behaviour::BlockOn("alpha"));
    let after = Scripted::new("after", Behaviour::Bugs(&[]));
    let validation = Scripted::new("validation", Behaviour::Bugs(&[]));
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![blocker, after.clone()], vec![validation.clone()]),
        None,
        RunConfig::default(),
    );

    let results = orch.run(&course(&["alpha"]), CancelFlag::new()).await.unwrap();

    let alpha = results.exercise("alpha").unwrap();
    assert!(!alpha.overall_passed);
    assert_eq!(alpha.blocked_at.as_deref(), Some("connectivity"));
    assert_eq!(alpha.phase_results.len(), 1);
    assert!(alpha.phase_results[0].is_blocked());
    assert_eq!(after.runs(), 0);
    assert_eq!(validation.runs(), 0);
    assert!(results.has_p0());
    assert_eq!(results.metrics.readiness, Readiness::NotReady);
}

#[tokio::test]
async fn blocked_exercise_does_not_affect_others() {
    let blocker = Scripted::new("connectivity", Behaviour::BlockOn("beta"));
    let after = Scripted::new("after", Behaviour::Bugs(&[]));
    let validation = Scripted::new("validation", Behaviour::Bugs(&[]));
    let mut config = RunConfig::default();
    config.parallelism = 3;
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![blocker, after.clone()], vec![validation.clone()]),
        None,
        config,
    );

    let results = orch
        .run(&course(&["alpha", "beta", "gamma"]), CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(results.exercise_results.len(), 3);
    for id in ["alpha", "gamma"] {
        let r = results.exercise(id).unwrap();
        assert!(r.overall_passed);
        assert_eq!(r.phase_results.len(), 3);
        assert!(r.blocked_at.is_none());
    }
    assert_eq!(results.exercise("beta").unwrap().phase_results.len(), 1);
    assert_eq!(after.runs(), 2);
    assert_eq!(validation.runs(), 2);
}

#[tokio::test]
async fn continue_on_blocker_runs_everything() {
    let blocker = Scripted::new("connectivity", Behaviour::BlockOn("alpha"));
    let after = Scripted::new("after", Behaviour::Bugs(&[]));
    let validation = Scripted::new("validation", Behaviour::Bugs(&[]));
    let config = RunConfig {
        stop_on_blocker: false,
        ..RunConfig::default()
    };
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![blocker, after.clone()], vec![validation.clone()]),
        None,
        config,
    );

    let results = orch.run(&course(&["alpha"]), CancelFlag::new()).await.unwrap();

    let alpha = results.exercise("alpha").unwrap();
    assert_eq!(alpha.phase_results.len(), 3);
    assert_eq!(alpha.blocked_at.as_deref(), Some("connectivity"));
    assert_eq!(validation.runs(), 1);
}

// ---------------------------------------------------------------------------
// Concurrency, crashes, cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn results_arrive_in_completion_order() {
    let sleepy = Scripted::new("sleepy", Behaviour::SlowOn("slow"));
    let config = RunConfig {
        parallelism: 2,
        ..RunConfig::default()
    };
    let orch = orchestrator(&FakeExecutor::new(), registry(vec![sleepy], vec![]), None, config);

    let results = orch.run(&course(&["slow", "fast"]), CancelFlag::new()).await.unwrap();

    let order: Vec<&str> = results
        .exercise_results
        .iter()
        .map(|r| r.exercise_id.as_str())
        .collect();
    assert_eq!(order, vec!["fast", "slow"]);
}

#[tokio::test]
async fn panicking_worker_becomes_single_p0() {
    let exploding = Scripted::new("exploding", Behaviour::PanicOn("boom"));
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![exploding], vec![]),
        None,
        RunConfig::default(),
    );

    let results = orch
        .run(&course(&["alpha", "boom"]), CancelFlag::new())
        .await
        .unwrap();

    let boom = results.exercise("boom").unwrap();
    assert_eq!(boom.total_bugs(), 1);
    assert_eq!(boom.phase_results[0].category, "orchestrator");
    assert_eq!(boom.phase_results[0].bugs[0].severity, Severity::P0);
    assert!(results.exercise("alpha").unwrap().overall_passed);
    assert!(results.has_p0());
}

#[tokio::test]
async fn cancellation_stops_new_checks_and_exercises() {
    let canceller = Scripted::new("canceller", Behaviour::CancelRun);
    let after = Scripted::new("after", Behaviour::Bugs(&[]));
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![canceller.clone(), after.clone()], vec![]),
        None,
        RunConfig::default(),
    );

    let results = orch
        .run(&course(&["alpha", "beta", "gamma"]), CancelFlag::new())
        .await
        .unwrap();

    assert!(results.cancelled);
    assert_eq!(canceller.runs(), 1);
    assert_eq!(after.runs(), 0);
    assert_eq!(results.exercise_results.len(), 1);
    assert_eq!(results.metrics.tested_exercises, 1);
    assert_eq!(results.metrics.total_exercises, 3);
}

#[tokio::test]
async fn cancelled_before_start_tests_nothing() {
    let check = Scripted::new("check", Behaviour::Bugs(&[]));
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![check.clone()], vec![]),
        None,
        RunConfig::default(),
    );
    let cancel = CancelFlag::new();
    cancel.cancel();

    let results = orch.run(&course(&["alpha"]), cancel).await.unwrap();
    assert!(results.cancelled);
    assert!(results.exercise_results.is_empty());
    assert_eq!(check.runs(), 0);
    assert_eq!(results.metrics.coverage, 0.0);
}

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_course_is_fatal() {
    let orch = orchestrator(&FakeExecutor::new(), CheckRegistry::standard(), None, RunConfig::default());
    let err = orch.run(&course(&[]), CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::NoExercises { .. }));
}

#[tokio::test]
async fn duplicate_exercise_ids_are_fatal() {
    let orch = orchestrator(&FakeExecutor::new(), CheckRegistry::standard(), None, RunConfig::default());
    let err = orch
        .run(&course(&["alpha", "alpha"]), CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidCourse(_)));
}

#[tokio::test]
async fn invalid_config_is_fatal() {
    let config = RunConfig {
        parallelism: 0,
        ..RunConfig::default()
    };
    let orch = orchestrator(&FakeExecutor::new(), CheckRegistry::standard(), None, config);
    let err = orch.run(&course(&["alpha"]), CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidConfig(_)));
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn passing_cacheable_results_are_reused_until_content_changes() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn ResultCache> = Arc::new(FsResultCache::new(dir.path()).unwrap());
    let cached = Scripted::cacheable("cached", Behaviour::Bugs(&[Severity::P3]));
    let failing = Scripted::cacheable("failing", Behaviour::Bugs(&[Severity::P1]));
    let uncached = Scripted::new("uncached", Behaviour::Bugs(&[]));
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![cached.clone(), failing.clone(), uncached.clone()], vec![]),
        Some(Arc::clone(&cache)),
        RunConfig::default(),
    );

    let first = orch.run(&course(&["alpha"]), CancelFlag::new()).await.unwrap();
    let second = orch.run(&course(&["alpha"]), CancelFlag::new()).await.unwrap();

    assert_eq!(cached.runs(), 1);
    assert_eq!(failing.runs(), 2);
    assert_eq!(uncached.runs(), 2);
    assert_eq!(
        first.exercise("alpha").unwrap().result("cached"),
        second.exercise("alpha").unwrap().result("cached")
    );
    assert_eq!(cache.len().unwrap(), 1);

    let mut changed = course(&["alpha"]);
    changed.exercises[0].content_version = "v2".to_string();
    orch.run(&changed, CancelFlag::new()).await.unwrap();
    assert_eq!(cached.runs(), 2);
}

#[tokio::test]
async fn exercises_without_content_version_are_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn ResultCache> = Arc::new(FsResultCache::new(dir.path()).unwrap());
    let cached = Scripted::cacheable("cached", Behaviour::Bugs(&[]));
    let orch = orchestrator(
        &FakeExecutor::new(),
        registry(vec![cached.clone()], vec![]),
        Some(Arc::clone(&cache)),
        RunConfig::default(),
    );

    let mut unversioned = course(&["alpha"]);
    unversioned.exercises[0].content_version.clear();
    orch.run(&unversioned, CancelFlag::new()).await.unwrap();
    orch.run(&unversioned, CancelFlag::new()).await.unwrap();

    assert_eq!(cached.runs(), 2);
    assert!(cache.is_empty().unwrap());
}

fn course_with_dependency() -> CourseContext {
    let mut course = course(&["ge-a", "lab-b"]);
    course.exercises[1].depends_on = vec!["ge-a".to_string()];
    course
}

fn dependency_bugs(results: &labcheck_core::CourseTestResults, exercise_id: &str) -> Vec<String> {
    results
        .exercise(exercise_id)
        .and_then(|r| r.result("dependencies"))
        .map(|r| r.bugs.iter().map(|b| b.description.clone()).collect())
        .unwrap_or_default()
}

fn dependency_orchestrator(cache: Arc<dyn ResultCache>) -> Orchestrator {
    let mut registry = CheckRegistry::new();
    registry
        .register(Phase::Simulation, Arc::new(DependencyCheck))
        .unwrap();
    orchestrator(&FakeExecutor::new(), registry, Some(cache), RunConfig::default())
}

#[tokio::test]
async fn partial_run_resolves_dependencies_against_whole_course() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn ResultCache> = Arc::new(FsResultCache::new(dir.path()).unwrap());
    let orch = dependency_orchestrator(Arc::clone(&cache));
    let course = course_with_dependency();

    let partial = orch
        .run_only(&course, &["lab-b".to_string()], CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(partial.exercise_results.len(), 1);
    assert_eq!(partial.metrics.total_exercises, 2);
    assert!(dependency_bugs(&partial, "lab-b").is_empty());

    let full = orch.run(&course, CancelFlag::new()).await.unwrap();
    assert!(dependency_bugs(&full, "lab-b").is_empty());
    assert!(cache.is_empty().unwrap());
}

#[tokio::test]
async fn removed_dependency_is_reported_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn ResultCache> = Arc::new(FsResultCache::new(dir.path()).unwrap());
    let orch = dependency_orchestrator(cache);

    let full = orch.run(&course_with_dependency(), CancelFlag::new()).await.unwrap();
    assert!(dependency_bugs(&full, "lab-b").is_empty());

    let mut shrunk = course_with_dependency();
    shrunk.exercises.retain(|e| e.id != "ge-a");
    let after = orch.run(&shrunk, CancelFlag::new()).await.unwrap();

    let bugs = dependency_bugs(&after, "lab-b");
    assert_eq!(bugs.len(), 1);
    assert!(bugs[0].contains("ge-a"));
}

#[tokio::test]
async fn run_only_rejects_unknown_exercise() {
    let orch = orchestrator(&FakeExecutor::new(), CheckRegistry::standard(), None, RunConfig::default());
    let err = orch
        .run_only(&course(&["alpha"]), &["omega".to_string()], CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidCourse(_)));
}

// ---------------------------------------------------------------------------
// End to end with the standard checks
// ---------------------------------------------------------------------------

fn lab(id: &str) -> ExerciseContext {
    let mut ex = ExerciseContext::new(id, ExerciseType::Lab);
    ex.content_version = "2024.1".to_string();
    ex.targets = vec![TargetSpec::new("servera").with_class(DeviceClass::Linux)];
    ex.lifecycle.setup = vec![RemoteCommand::new("servera", "useradd operator1")];
    ex.solution_refs = vec!["mkfile /home/operator1/report.txt".to_string()];
    ex.grading_ref = Some("grade /home/operator1/report.txt".to_string());
    ex.lifecycle.teardown = vec![
        RemoteCommand::new("servera", "rmfile /home/operator1/report.txt"),
        RemoteCommand::new("servera", "userdel operator1"),
    ];
    ex
}

#[tokio::test]
async fn clean_lab_scores_one_hundred() {
    let exec = FakeExecutor::new();
    exec.host("servera").simulate();
    let orch = orchestrator(&exec, CheckRegistry::standard(), None, RunConfig::default());
    let course = CourseContext {
        course_id: "rh134".to_string(),
        exercises: vec![lab("users-lab")],
        total_exercises: None,
    };

    let results = orch.run(&course, CancelFlag::new()).await.unwrap();

    let r = results.exercise("users-lab").unwrap();
    assert!(r.overall_passed, "unexpected bugs: {:?}", r.bugs().collect::<Vec<_>>());
    assert_eq!(r.total_bugs(), 0);
    assert_eq!(r.phase_results.len(), 6);
    assert_eq!(results.metrics.reliability_checks_total, 2);
    assert_eq!(results.metrics.quality_score, 100.0);
    assert_eq!(results.metrics.readiness, Readiness::Ready);
    assert!(orch.pool().pooled_targets().await.is_empty());
}

#[tokio::test]
async fn untested_exercises_reduce_coverage() {
    let exec = FakeExecutor::new();
    exec.host("servera").simulate();
    let orch = orchestrator(&exec, CheckRegistry::standard(), None, RunConfig::default());
    let course = CourseContext {
        course_id: "rh134".to_string(),
        exercises: vec![lab("users-lab")],
        total_exercises: Some(2),
    };

    let results = orch.run(&course, CancelFlag::new()).await.unwrap();

    assert_eq!(results.metrics.coverage, 15.0);
    assert_eq!(results.metrics.quality_score, 85.0);
    assert_eq!(results.metrics.readiness, Readiness::Conditional);
}

#[tokio::test]
async fn second_run_reuses_cached_simulation_results() {
    let dir = tempfile::tempdir().unwrap();
    let exec = FakeExecutor::new();
    exec.host("servera").simulate();
    let cache: Arc<dyn ResultCache> = Arc::new(FsResultCache::new(dir.path()).unwrap());
    let orch = orchestrator(&exec, CheckRegistry::standard(), Some(cache), RunConfig::default());
    let course = CourseContext {
        course_id: "rh134".to_string(),
        exercises: vec![lab("users-lab")],
        total_exercises: None,
    };
    let grade = "grade /home/operator1/report.txt";

    orch.run(&course, CancelFlag::new()).await.unwrap();
    // lifecycle + two idempotency cycles + negative grading
    assert_eq!(exec.count("servera", grade), 4);

    let results = orch.run(&course, CancelFlag::new()).await.unwrap();
    // Only the idempotency cycles ran again.
    assert_eq!(exec.count("servera", grade), 6);
    assert_eq!(results.metrics.quality_score, 100.0);
}
