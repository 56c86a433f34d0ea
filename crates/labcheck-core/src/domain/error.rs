//! Fatal, run-level error taxonomy.
//!
//! Per-exercise failures never surface here; they become bugs in the result
//! tree. Only configuration or input problems abort a run.

/// Errors that abort an entire run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("no exercises resolved for course {course_id}")]
    NoExercises { course_id: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid course descriptor: {0}")]
    InvalidCourse(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, OrchestrationError>;
