//! Process-backed executor: local `sh -c` or the system `ssh` client.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, DeviceClass, ExecutorError, RemoteExecutor, RemoteSession};
use crate::domain::TargetSpec;

/// Addresses that run commands on this machine instead of over SSH.
const LOCAL_ADDRESSES: &[&str] = &["localhost", "127.0.0.1", "local"];

/// Exit status the `ssh` client reserves for its own failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Timeout for the probe that opens an SSH session.
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Executor that spawns processes per command.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    ssh_program: String,
    ssh_options: Vec<String>,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            ssh_options: vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "ConnectTimeout=10".to_string(),
            ],
        }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra `ssh` options, e.g. `["-i", "~/.ssh/lab_rsa"]`.
    pub fn with_ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options.extend(options);
        self
    }
}

#[async_trait]
impl RemoteExecutor for ProcessExecutor {
    async fn connect(&self, target: &TargetSpec) -> Result<Arc<dyn RemoteSession>, ExecutorError> {
        let address = target.address();
        if LOCAL_ADDRESSES.contains(&address) {
            return Ok(Arc::new(ProcessSession::Local));
        }

        let session = ProcessSession::Ssh {
            program: self.ssh_program.clone(),
            options: self.ssh_options.clone(),
            destination: address.to_string(),
        };

        // The SSH client has no persistent handle; probe once so an
        // unreachable host fails at connect time.
        let probe = target
            .device_class
            .map_or("true", DeviceClass::health_check_command);
        match session.run(probe, CONNECT_PROBE_TIMEOUT).await {
            Ok(out) if out.success() => Ok(Arc::new(session)),
            Ok(out) => Err(ExecutorError::Connect {
                target: target.name.clone(),
                reason: format!("ssh exited with {}: {}", out.exit_code, out.stderr.trim()),
            }),
            Err(e) => Err(ExecutorError::Connect {
                target: target.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
enum ProcessSession {
    Local,
    Ssh {
        program: String,
        options: Vec<String>,
        destination: String,
    },
}

impl ProcessSession {
    fn command(&self, command: &str) -> Command {
        match self {
            ProcessSession::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
            ProcessSession::Ssh {
                program,
                options,
                destination,
            } => {
                let mut cmd = Command::new(program);
                cmd.args(options).arg(destination).arg(command);
                cmd
            }
        }
    }
}

#[async_trait]
impl RemoteSession for ProcessSession {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecutorError> {
        let start = Instant::now();
        debug!(command = %command, "spawning");

        let child = self
            .command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutorError::Timeout(timeout))??;

        let out = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        };

        match self {
            ProcessSession::Ssh { destination, .. } if out.exit_code == SSH_TRANSPORT_FAILURE => {
                Err(ExecutorError::SessionClosed(format!(
                    "ssh to {destination} failed: {}",
                    out.stderr.trim()
                )))
            }
            _ => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_session_runs_command() {
        let executor = ProcessExecutor::new();
        let session = executor
            .connect(&TargetSpec::new("localhost"))
            .await
            .expect("connect failed");

        let out = session
            .run("echo hello", Duration::from_secs(10))
            .await
            .expect("run failed");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_local_session_reports_exit_code() {
        let executor = ProcessExecutor::new();
        let session = executor.connect(&TargetSpec::new("localhost")).await.unwrap();

        let out = session.run("exit 3", Duration::from_secs(10)).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    /// An `ssh` stand-in: `sh -c <script> <destination> <command>`.
    fn fake_ssh(script: &str) -> ProcessExecutor {
        ProcessExecutor {
            ssh_program: "sh".to_string(),
            ssh_options: vec!["-c".to_string(), script.to_string()],
        }
    }

    fn ssh_session(script: &str) -> ProcessSession {
        ProcessSession::Ssh {
            program: "sh".to_string(),
            options: vec!["-c".to_string(), script.to_string()],
            destination: "servera".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ssh_transport_failure_closes_session() {
        let result = ssh_session("echo 'Connection reset' >&2; exit 255")
            .run("lab grade", Duration::from_secs(10))
            .await;
        match result {
            Err(ExecutorError::SessionClosed(reason)) => {
                assert!(reason.contains("servera"));
                assert!(reason.contains("Connection reset"));
            }
            other => panic!("expected SessionClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ssh_command_failure_is_an_exit_code() {
        let out = ssh_session("exit 3")
            .run("lab grade", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_connect_probe_uses_declared_class() {
        // Succeeds only when the probe command is the Cisco health check.
        let executor = fake_ssh(r#"test "$1" = "show clock""#);

        let cisco = TargetSpec::new("router1").with_class(DeviceClass::Cisco);
        assert!(executor.connect(&cisco).await.is_ok());

        let undeclared = TargetSpec::new("router1");
        let err = executor.connect(&undeclared).await.err().expect("probe `true` rejected");
        assert!(matches!(err, ExecutorError::Connect { .. }));
    }

    #[test]
    fn test_extra_ssh_options_are_appended() {
        let executor = ProcessExecutor::new().with_ssh_options(vec!["-i".into(), "lab_rsa".into()]);
        assert_eq!(executor.ssh_options[executor.ssh_options.len() - 2..], ["-i", "lab_rsa"]);
    }

    #[tokio::test]
    async fn test_local_session_times_out() {
        let executor = ProcessExecutor::new();
        let session = executor.connect(&TargetSpec::new("localhost")).await.unwrap();

        let result = session.run("sleep 5", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ExecutorError::Timeout(_))));
    }
}
