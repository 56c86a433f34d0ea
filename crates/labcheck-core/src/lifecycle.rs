//! Exercise lifecycle execution: setup, solutions, grading, teardown.
//!
//! Every step runs through the [`ConnectionPool`]. Failures are collected as
//! [`StepFailure`]s rather than aborting at the first one; only a lost target
//! stops the remaining steps.
//!
//! Grading never trusts the grader's exit code. The verdict comes from
//! structured markers in its output (see [`GradingMarkers`]).

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::{Bug, ExerciseContext, RemoteCommand, Severity};
use crate::executor::CommandOutput;
use crate::pool::{ConnectionPool, PoolError};

/// Longest stdout/stderr excerpt kept as Bug evidence.
const EVIDENCE_LIMIT: usize = 2000;

// ---------------------------------------------------------------------------
// Grading markers
// ---------------------------------------------------------------------------

/// Line patterns recognised in grader output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GradingMarkers {
    pub pass_pattern: String,
    pub fail_pattern: String,
}

impl Default for GradingMarkers {
    fn default() -> Self {
        Self {
            pass_pattern: r"^\s*PASS\b".to_string(),
            fail_pattern: r"^\s*FAIL\b".to_string(),
        }
    }
}

/// Compiled form of [`GradingMarkers`].
#[derive(Debug, Clone)]
pub struct MarkerSet {
    pass: Regex,
    fail: Regex,
}

impl MarkerSet {
    pub fn compile(markers: &GradingMarkers) -> Result<Self, regex::Error> {
        Ok(Self {
            pass: Regex::new(&markers.pass_pattern)?,
            fail: Regex::new(&markers.fail_pattern)?,
        })
    }

    /// Classify grader output line by line. Any FAIL line wins.
    pub fn verdict(&self, output: &str) -> GradeVerdict {
        let mut saw_pass = false;
        let mut failing = Vec::new();
        for line in output.lines() {
            if self.fail.is_match(line) {
                failing.push(line.trim().to_string());
            } else if self.pass.is_match(line) {
                saw_pass = true;
            }
        }

        if !failing.is_empty() {
            GradeVerdict::Fail { failing_lines: failing }
        } else if saw_pass {
            GradeVerdict::Pass
        } else {
            GradeVerdict::Indeterminate
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeVerdict {
    Pass,
    Fail { failing_lines: Vec<String> },
    /// No recognised marker in the output.
    Indeterminate,
}

#[derive(Debug, Clone)]
pub struct GradeOutcome {
    pub verdict: GradeVerdict,
    /// Recorded as evidence only.
    pub exit_code: i32,
    pub output: String,
}

// ---------------------------------------------------------------------------
// Steps and failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Setup,
    Solution,
    Grading,
    Teardown,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Setup => "setup",
            Step::Solution => "solution",
            Step::Grading => "grading",
            Step::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed lifecycle command.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub step: Step,
    pub target: String,
    pub command: String,
    pub severity: Severity,
    pub reason: String,
    pub evidence: String,
    /// The target became unreachable; later steps were not attempted.
    pub blocked: bool,
}

impl StepFailure {
    /// Stable key identifying the command this failure belongs to.
    pub fn key(&self) -> String {
        step_key(self.step, &self.target, &self.command)
    }

    pub fn into_bug(self, id: String, category: &str, exercise_id: &str) -> Bug {
        let description = format!(
            "{} command `{}` on {} failed: {}",
            self.step, self.command, self.target, self.reason
        );
        let fix = match self.step {
            Step::Setup => "Make the setup script succeed on a freshly provisioned environment",
            Step::Solution => "Fix the solution so it applies cleanly after setup",
            Step::Grading => "Make the grading script runnable after setup",
            Step::Teardown => "Make the teardown script succeed after a completed exercise",
        };
        Bug::new(id, self.severity, category, exercise_id, description)
            .with_fix(fix)
            .with_evidence(self.evidence)
            .with_verification_step(format!("Run `{}` on {}", self.command, self.target))
    }
}

pub(crate) fn step_key(step: Step, target: &str, command: &str) -> String {
    format!("{step}:{target}:{command}")
}

/// Everything one lifecycle pass observed.
#[derive(Debug, Default, Clone)]
pub struct LifecycleReport {
    pub failures: Vec<StepFailure>,
    /// `None` when grading was not requested or the grader could not run.
    pub grade: Option<GradeOutcome>,
    /// Keys of commands that completed successfully, in execution order.
    pub succeeded: Vec<String>,
}

impl LifecycleReport {
    pub fn blocked(&self) -> bool {
        self.failures.iter().any(|f| f.blocked)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, other: LifecycleReport) {
        self.failures.extend(other.failures);
        self.succeeded.extend(other.succeeded);
        if other.grade.is_some() {
            self.grade = other.grade;
        }
    }
}

/// Which optional steps a lifecycle pass includes.
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePlan {
    pub apply_solutions: bool,
    pub grade: bool,
}

impl LifecyclePlan {
    pub const FULL: LifecyclePlan = LifecyclePlan {
        apply_solutions: true,
        grade: true,
    };

    /// Grade an exercise that was set up but never solved.
    pub const UNSOLVED: LifecyclePlan = LifecyclePlan {
        apply_solutions: false,
        grade: true,
    };
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes one exercise's lifecycle through the pool.
pub struct LifecycleRunner<'a> {
    pool: &'a ConnectionPool,
    exercise: &'a ExerciseContext,
    markers: &'a MarkerSet,
    default_timeout: Duration,
}

impl<'a> LifecycleRunner<'a> {
    pub fn new(
        pool: &'a ConnectionPool,
        exercise: &'a ExerciseContext,
        markers: &'a MarkerSet,
        default_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            exercise,
            markers,
            default_timeout,
        }
    }

    /// Run setup, the optional middle steps, then teardown.
    ///
    /// Teardown still runs after setup or solution failures so the target
    /// is left as clean as possible; nothing runs once a target is lost.
    #[instrument(skip(self), fields(exercise_id = %self.exercise.id))]
    pub async fn run(&self, plan: LifecyclePlan) -> LifecycleReport {
        let mut report = self.setup().await;

        if plan.apply_solutions && !report.blocked() {
            report.absorb(self.apply_solutions().await);
        }
        if plan.grade && !report.blocked() {
            if let Some(graded) = self.grade().await {
                report.absorb(graded);
            }
        }
        if !report.blocked() {
            report.absorb(self.teardown().await);
        }
        report
    }

    pub async fn setup(&self) -> LifecycleReport {
        self.run_commands(Step::Setup, &self.exercise.lifecycle.setup)
            .await
    }

    pub async fn teardown(&self) -> LifecycleReport {
        self.run_commands(Step::Teardown, &self.exercise.lifecycle.teardown)
            .await
    }

    /// Apply every solution reference on the primary target.
    pub async fn apply_solutions(&self) -> LifecycleReport {
        let Some(primary) = self.exercise.primary_target() else {
            return LifecycleReport::default();
        };
        let commands: Vec<RemoteCommand> = self
            .exercise
            .solution_refs
            .iter()
            .map(|s| RemoteCommand::new(primary.name.clone(), s.clone()))
            .collect();
        self.run_commands(Step::Solution, &commands).await
    }

    /// Run the grader on the primary target, if the exercise has one.
    pub async fn grade(&self) -> Option<LifecycleReport> {
        let grading_ref = self.exercise.grading_ref.as_ref()?;
        let primary = self.exercise.primary_target()?;
        let command = RemoteCommand::new(primary.name.clone(), grading_ref.clone());

        let mut report = LifecycleReport::default();
        match self.exec(&command).await {
            Ok(out) => {
                let verdict = self.markers.verdict(&out.stdout);
                debug!(?verdict, exit_code = out.exit_code, "grader finished");
                report
                    .succeeded
                    .push(step_key(Step::Grading, &command.target, &command.command));
                report.grade = Some(GradeOutcome {
                    verdict,
                    exit_code: out.exit_code,
                    output: excerpt(&out.stdout),
                });
            }
            Err(failure) => report.failures.push(failure.at(Step::Grading)),
        }
        Some(report)
    }

    async fn run_commands(&self, step: Step, commands: &[RemoteCommand]) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for command in commands {
            match self.exec(command).await {
                Ok(out) if out.success() => report
                    .succeeded
                    .push(step_key(step, &command.target, &command.command)),
                Ok(out) => report.failures.push(StepFailure {
                    step,
                    target: command.target.clone(),
                    command: command.command.clone(),
                    severity: Severity::P1,
                    reason: format!("exit code {}", out.exit_code),
                    evidence: output_evidence(&out),
                    blocked: false,
                }),
                Err(failure) => {
                    let failure = failure.at(step);
                    let blocked = failure.blocked;
                    report.failures.push(failure);
                    if blocked {
                        break;
                    }
                }
            }
        }
        report
    }

    async fn exec(&self, command: &RemoteCommand) -> Result<CommandOutput, PendingFailure> {
        let Some(target) = self.exercise.target(&command.target) else {
            return Err(PendingFailure {
                target: command.target.clone(),
                command: command.command.clone(),
                severity: Severity::P2,
                reason: "target is not declared by the exercise".to_string(),
                evidence: format!("declared targets: {}", self.declared_targets()),
                blocked: false,
            });
        };

        let timeout = command
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        self.pool
            .run_on(target, &command.command, timeout)
            .await
            .map_err(|e| PendingFailure::from_pool(command, e))
    }

    fn declared_targets(&self) -> String {
        self.exercise
            .targets
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A failure not yet attributed to a step.
struct PendingFailure {
    target: String,
    command: String,
    severity: Severity,
    reason: String,
    evidence: String,
    blocked: bool,
}

impl PendingFailure {
    fn from_pool(command: &RemoteCommand, err: PoolError) -> Self {
        let (severity, blocked) = match &err {
            PoolError::Connectivity { .. } => (Severity::P0, true),
            PoolError::CommandTimeout { .. } | PoolError::Execution { .. } => (Severity::P1, false),
        };
        Self {
            target: command.target.clone(),
            command: command.command.clone(),
            severity,
            reason: err.to_string(),
            evidence: err.to_string(),
            blocked,
        }
    }

    fn at(self, step: Step) -> StepFailure {
        StepFailure {
            step,
            target: self.target,
            command: self.command,
            severity: self.severity,
            reason: self.reason,
            evidence: self.evidence,
            blocked: self.blocked,
        }
    }
}

fn output_evidence(out: &CommandOutput) -> String {
    format!(
        "exit code: {}\nstdout:\n{}\nstderr:\n{}",
        out.exit_code,
        excerpt(&out.stdout),
        excerpt(&out.stderr)
    )
}

pub(crate) fn excerpt(text: &str) -> String {
    if text.len() <= EVIDENCE_LIMIT {
        return text.to_string();
    }
    let mut end = EVIDENCE_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> MarkerSet {
        MarkerSet::compile(&GradingMarkers::default()).unwrap()
    }

    #[test]
    fn verdict_pass() {
        let out = "Grading the lab\n PASS  Service is running\n PASS  Port open\n";
        assert_eq!(markers().verdict(out), GradeVerdict::Pass);
    }

    #[test]
    fn verdict_fail_lists_every_failing_line() {
        let out = " PASS  Service is running\n FAIL  Port closed\n FAIL  User missing\n";
        match markers().verdict(out) {
            GradeVerdict::Fail { failing_lines } => {
                assert_eq!(failing_lines, vec!["FAIL  Port closed", "FAIL  User missing"]);
            }
            other => panic!("expected Fail, got {other:?}"),
        }
    }

    #[test]
    fn verdict_without_markers_is_indeterminate() {
        assert_eq!(markers().verdict("all good\n"), GradeVerdict::Indeterminate);
        assert_eq!(markers().verdict("PASSWORD reset\n"), GradeVerdict::Indeterminate);
    }

    #[test]
    fn custom_markers() {
        let set = MarkerSet::compile(&GradingMarkers {
            pass_pattern: r"^\[OK\]".to_string(),
            fail_pattern: r"^\[ERR\]".to_string(),
        })
        .unwrap();
        assert_eq!(set.verdict("[OK] done"), GradeVerdict::Pass);
        assert!(matches!(set.verdict("[ERR] nope"), GradeVerdict::Fail { .. }));
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(EVIDENCE_LIMIT);
        let cut = excerpt(&long);
        assert!(cut.ends_with("[truncated]"));
        assert!(cut.len() < long.len());
    }

    #[test]
    fn step_failure_becomes_bug() {
        let failure = StepFailure {
            step: Step::Setup,
            target: "servera".to_string(),
            command: "lab start".to_string(),
            severity: Severity::P1,
            reason: "exit code 1".to_string(),
            evidence: "stderr: boom".to_string(),
            blocked: false,
        };
        assert_eq!(failure.key(), "setup:servera:lab start");
        let bug = failure.into_bug("LIFECYCLE-alpha-1".to_string(), "lifecycle", "alpha");
        assert_eq!(bug.severity, Severity::P1);
        assert!(bug.description.contains("lab start"));
        assert_eq!(bug.evidence, "stderr: boom");
    }
}
