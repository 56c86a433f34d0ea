//! Domain models for labcheck.
//!
//! Canonical definitions for the core entities:
//! - `ExerciseContext`: read-only description of one exercise and its targets
//! - `Bug`: a defect discovered by a check
//! - `TestResult`: outcome of one check against one exercise
//! - `ExerciseTestResults` / `CourseTestResults`: the result tree handed to reporters

pub mod bug;
pub mod error;
pub mod exercise;
pub mod result;

pub use bug::{Bug, Severity};
pub use error::{OrchestrationError, Result};
pub use exercise::{
    CourseContext, ExerciseContext, ExerciseType, Lifecycle, RemoteCommand, TargetSpec,
};
pub use result::{CourseTestResults, ExerciseTestResults, TestResult, BLOCKED_DETAIL};
