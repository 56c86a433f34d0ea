//! Remote command execution capability.
//!
//! The core only depends on "connect to a target, run a command with a
//! timeout, get output". Concrete transports live behind [`RemoteExecutor`]:
//! [`process::ProcessExecutor`] shells out locally or over `ssh`, and
//! [`crate::fakes::FakeExecutor`] scripts hosts in memory for tests.

pub mod device;
pub mod process;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::TargetSpec;

pub use device::{negotiate, DeviceClass};
pub use process::ProcessExecutor;

/// Output of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from the executor capability.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("connect to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live command-execution session on one target.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecutorError>;
}

/// Opens sessions to targets.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn connect(&self, target: &TargetSpec) -> Result<Arc<dyn RemoteSession>, ExecutorError>;
}
