//! Exercise descriptors supplied by the content-parsing collaborator.
//!
//! These are read-only to the core: the orchestrator hands out shared
//! references and never mutates them.

use serde::{Deserialize, Serialize};

use crate::executor::DeviceClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExerciseType {
    GuidedExercise,
    Lab,
}

/// A remote machine an exercise runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Pool key. Workers targeting the same name share one serialized session.
    pub name: String,

    /// Host or `user@host` to reach. Defaults to `name`.
    #[serde(default)]
    pub address: Option<String>,

    /// Declared device class; negotiated on connect when absent.
    #[serde(default)]
    pub device_class: Option<DeviceClass>,
}

impl TargetSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            device_class: None,
        }
    }

    pub fn with_class(mut self, class: DeviceClass) -> Self {
        self.device_class = Some(class);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }
}

/// One command of an exercise lifecycle, bound to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommand {
    pub target: String,
    pub command: String,
    /// Base timeout before the device-class multiplier.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl RemoteCommand {
    pub fn new(target: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            command: command.into(),
            timeout_secs: None,
        }
    }
}

/// Setup and teardown commands; solutions and grading come from the refs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    #[serde(default)]
    pub setup: Vec<RemoteCommand>,
    #[serde(default)]
    pub teardown: Vec<RemoteCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseContext {
    pub id: String,

    #[serde(rename = "type")]
    pub exercise_type: ExerciseType,

    /// Part of the cache fingerprint; bump it whenever content changes.
    #[serde(default)]
    pub content_version: String,

    /// Solution commands, run in order on the primary target.
    #[serde(default)]
    pub solution_refs: Vec<String>,

    /// Grading command, run on the primary target.
    #[serde(default)]
    pub grading_ref: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub targets: Vec<TargetSpec>,

    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl ExerciseContext {
    pub fn new(id: impl Into<String>, exercise_type: ExerciseType) -> Self {
        Self {
            id: id.into(),
            exercise_type,
            content_version: String::new(),
            solution_refs: Vec::new(),
            grading_ref: None,
            depends_on: Vec::new(),
            targets: Vec::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    /// The first declared target; solutions and grading run here.
    pub fn primary_target(&self) -> Option<&TargetSpec> {
        self.targets.first()
    }

    pub fn target(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.iter().find(|t| t.name == name)
    }
}

/// The course descriptor: every exercise to test in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseContext {
    pub course_id: String,
    pub exercises: Vec<ExerciseContext>,
    /// Exercises known to exist, including untested ones. Defaults to
    /// `exercises.len()`.
    #[serde(default)]
    pub total_exercises: Option<usize>,
}

impl CourseContext {
    pub fn total_exercises(&self) -> usize {
        self.total_exercises
            .unwrap_or(self.exercises.len())
            .max(self.exercises.len())
    }
}
