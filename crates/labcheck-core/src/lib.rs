//! labcheck core library
//!
//! Live-environment regression testing for lab exercises: connection
//! pooling, pluggable checks, idempotency verification, result caching and
//! course quality scoring.

pub mod cache;
pub mod checks;
pub mod config;
pub mod context;
pub mod counters;
pub mod domain;
pub mod executor;
pub mod fakes;
pub mod idempotency;
pub mod lifecycle;
pub mod obs;
pub mod orchestrator;
pub mod pool;
pub mod scoring;
pub mod telemetry;

pub use domain::{
    Bug, CourseContext, CourseTestResults, ExerciseContext, ExerciseTestResults, ExerciseType,
    Lifecycle, OrchestrationError, RemoteCommand, Result, Severity, TargetSpec, TestResult,
    BLOCKED_DETAIL,
};

pub use cache::fs::FsResultCache;
pub use cache::{CacheConfig, CacheEntry, CacheError, Fingerprint, ResultCache};

pub use checks::{BugCollector, Check, CheckContext, CheckRegistry, Phase};
pub use config::RunConfig;
pub use context::{CancelFlag, RunContext};
pub use executor::{
    negotiate, CommandOutput, DeviceClass, ExecutorError, ProcessExecutor, RemoteExecutor,
    RemoteSession,
};
pub use idempotency::{
    diff_snapshots, IdempotencyConfig, IdempotencyEngine, IdempotencyResult, SnapshotDiff,
    StateSnapshot,
};
pub use lifecycle::{GradeVerdict, GradingMarkers, LifecyclePlan, LifecycleRunner, StepFailure};
pub use orchestrator::Orchestrator;
pub use pool::{Connection, ConnectionPool, DeviceTimeouts, PoolConfig, PoolError, RetryPolicy};
pub use scoring::{compute_metrics, QualityMetrics, Readiness, ScoringConfig, SeverityWeights};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
