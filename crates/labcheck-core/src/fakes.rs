//! In-memory remote executor for tests.
//!
//! [`FakeExecutor`] hands out sessions to scripted [`FakeHost`]s. Each host
//! answers commands through a handler closure and can inject connect
//! failures, failing health checks, broken sessions and latency. Every
//! command is recorded in a shared history.
//!
//! [`SimState`] is a tiny simulated Linux machine whose observable state
//! (files, services, users, packages) is mutated by a handful of commands
//! and reported through the default snapshot probes.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::TargetSpec;
use crate::executor::{CommandOutput, ExecutorError, RemoteExecutor, RemoteSession};

/// What a fake host answers to one command.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Output {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    /// Never completes; the caller's timeout fires.
    Hang,
    /// The session dies while running the command.
    SessionLost,
}

impl FakeReply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        FakeReply::Output {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        FakeReply::Output {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }
}

type Handler = Arc<dyn Fn(&str) -> FakeReply + Send + Sync>;

/// One recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub host: String,
    pub command: String,
}

struct HostInner {
    handler: Handler,
    unreachable: bool,
    connect_failures: u32,
    health_failures: u32,
    latency: Duration,
}

/// Scripted behaviour of one target.
#[derive(Clone)]
pub struct FakeHost {
    name: String,
    inner: Arc<Mutex<HostInner>>,
    generation: Arc<AtomicU64>,
    connects: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeHost {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Arc::new(Mutex::new(HostInner {
                handler: Arc::new(default_reply),
                unreachable: false,
                connect_failures: 0,
                health_failures: 0,
                latency: Duration::ZERO,
            })),
            generation: Arc::new(AtomicU64::new(0)),
            connects: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replace the command handler.
    pub fn on(&self, handler: impl Fn(&str) -> FakeReply + Send + Sync + 'static) -> &Self {
        self.lock().handler = Arc::new(handler);
        self
    }

    /// Install a [`SimState`] as this host's handler and return it.
    pub fn simulate(&self) -> SimState {
        let state = SimState::default();
        let handle = state.clone();
        self.on(move |cmd| handle.apply(cmd));
        state
    }

    pub fn set_unreachable(&self, unreachable: bool) -> &Self {
        self.lock().unreachable = unreachable;
        self
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_connects(&self, n: u32) -> &Self {
        self.lock().connect_failures = n;
        self
    }

    /// Fail the next `n` health-check commands.
    pub fn fail_health_checks(&self, n: u32) -> &Self {
        self.lock().health_failures = n;
        self
    }

    pub fn with_latency(&self, latency: Duration) -> &Self {
        self.lock().latency = latency;
        self
    }

    /// Kill every session handed out so far.
    pub fn break_sessions(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Highest number of commands observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn default_reply(command: &str) -> FakeReply {
    match command {
        "uname -s" => FakeReply::ok("Linux\n"),
        _ => FakeReply::ok(""),
    }
}

/// Scripted [`RemoteExecutor`].
#[derive(Clone, Default)]
pub struct FakeExecutor {
    hosts: Arc<Mutex<HashMap<String, FakeHost>>>,
    history: Arc<Mutex<Vec<FakeCall>>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The host named `name`, created with default behaviour on first use.
    pub fn host(&self, name: &str) -> FakeHost {
        let mut hosts = self.hosts.lock().unwrap_or_else(|p| p.into_inner());
        hosts
            .entry(name.to_string())
            .or_insert_with(|| FakeHost::new(name))
            .clone()
    }

    pub fn history(&self) -> Vec<FakeCall> {
        self.history.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.history()
            .into_iter()
            .filter(|c| c.host == host)
            .map(|c| c.command)
            .collect()
    }

    /// Number of recorded commands on `host` equal to `command`.
    pub fn count(&self, host: &str, command: &str) -> usize {
        self.commands_for(host).iter().filter(|c| *c == command).count()
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn connect(&self, target: &TargetSpec) -> Result<Arc<dyn RemoteSession>, ExecutorError> {
        let host = self.host(&target.name);
        host.connects.fetch_add(1, Ordering::SeqCst);

        {
            let mut inner = host.lock();
            if inner.unreachable {
                return Err(ExecutorError::Connect {
                    target: target.name.clone(),
                    reason: "no route to host".to_string(),
                });
            }
            if inner.connect_failures > 0 {
                inner.connect_failures -= 1;
                return Err(ExecutorError::Connect {
                    target: target.name.clone(),
                    reason: "connection refused".to_string(),
                });
            }
        }

        Ok(Arc::new(FakeSession {
            generation: host.generation.load(Ordering::SeqCst),
            host,
            history: Arc::clone(&self.history),
        }))
    }
}

struct FakeSession {
    host: FakeHost,
    generation: u64,
    history: Arc<Mutex<Vec<FakeCall>>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, ExecutorError> {
        if self.host.generation.load(Ordering::SeqCst) != self.generation {
            return Err(ExecutorError::SessionClosed(self.host.name.clone()));
        }

        self.history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(FakeCall {
                host: self.host.name.clone(),
                command: command.to_string(),
            });

        let now = self.host.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.host.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.host.in_flight);

        let (reply, latency) = {
            let mut inner = self.host.lock();
            let is_health_check = command == "true";
            let reply = if is_health_check && inner.health_failures > 0 {
                inner.health_failures -= 1;
                FakeReply::fail(1, "health check failed")
            } else {
                (inner.handler)(command)
            };
            (reply, inner.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match reply {
            FakeReply::Output {
                stdout,
                stderr,
                exit_code,
            } => Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
                duration: latency,
            }),
            FakeReply::Hang => std::future::pending().await,
            FakeReply::SessionLost => Err(ExecutorError::SessionClosed(self.host.name.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated host state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SimInner {
    files: BTreeSet<String>,
    services: BTreeSet<String>,
    users: BTreeSet<String>,
    packages: BTreeSet<String>,
    counter: u64,
}

/// Observable state of a simulated Linux host.
///
/// Understood commands (anything else succeeds silently):
///
/// | command | effect |
/// |---|---|
/// | `mkfile PATH` | add a file |
/// | `rmfile PATH` | remove a file |
/// | `useradd NAME` | add a user, fails if it exists |
/// | `userdel NAME` | remove a user, fails if missing |
/// | `svc-start NAME` / `svc-stop NAME` | toggle a service |
/// | `pkg-install NAME` / `pkg-remove NAME` | toggle a package |
/// | `mkfile-seq PREFIX` | add `PREFIX-<n>` with a fresh `n` each call |
/// | `stamp PATH` | add `PATH <timestamp>` with a fresh timestamp |
/// | `grade FILE` | prints `PASS` if FILE exists, else `FAIL` |
/// | `fail` | exit code 1 |
#[derive(Debug, Clone, Default)]
pub struct SimState {
    inner: Arc<Mutex<SimInner>>,
}

impl SimState {
    fn lock(&self) -> std::sync::MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.lock().files.contains(path)
    }

    pub fn files(&self) -> Vec<String> {
        self.lock().files.iter().cloned().collect()
    }

    pub fn users(&self) -> Vec<String> {
        self.lock().users.iter().cloned().collect()
    }

    pub fn apply(&self, command: &str) -> FakeReply {
        let mut s = self.lock();
        let (verb, arg) = command.split_once(' ').unwrap_or((command, ""));
        let arg = arg.trim().to_string();

        match verb {
            "uname" => FakeReply::ok("Linux\n"),
            "mkfile" => {
                s.files.insert(arg);
                FakeReply::ok("")
            }
            "rmfile" => {
                s.files.remove(&arg);
                FakeReply::ok("")
            }
            "useradd" => {
                if s.users.insert(arg.clone()) {
                    FakeReply::ok("")
                } else {
                    FakeReply::fail(9, format!("useradd: user '{arg}' already exists"))
                }
            }
            "userdel" => {
                if s.users.remove(&arg) {
                    FakeReply::ok("")
                } else {
                    FakeReply::fail(6, format!("userdel: user '{arg}' does not exist"))
                }
            }
            "svc-start" => {
                s.services.insert(arg);
                FakeReply::ok("")
            }
            "svc-stop" => {
                s.services.remove(&arg);
                FakeReply::ok("")
            }
            "pkg-install" => {
                s.packages.insert(arg);
                FakeReply::ok("")
            }
            "pkg-remove" => {
                s.packages.remove(&arg);
                FakeReply::ok("")
            }
            "mkfile-seq" => {
                s.counter += 1;
                let name = format!("{arg}-{}", s.counter);
                s.files.insert(name);
                FakeReply::ok("")
            }
            "stamp" => {
                s.counter += 1;
                let line = format!("{arg} 2024-01-01T00:00:{:02}Z", s.counter % 60);
                s.files.retain(|f| !f.starts_with(&format!("{arg} ")));
                s.files.insert(line);
                FakeReply::ok("")
            }
            "grade" => {
                if s.files.contains(&arg) {
                    FakeReply::ok(format!(" PASS  {arg} present\n"))
                } else {
                    FakeReply::ok(format!(" FAIL  {arg} missing\n"))
                }
            }
            "fail" => FakeReply::fail(1, "simulated failure"),
            "find" => FakeReply::ok(lines(&s.files)),
            "systemctl" => FakeReply::ok(lines(&s.services)),
            "getent" => FakeReply::ok(lines(&s.users)),
            "rpm" => FakeReply::ok(lines(&s.packages)),
            _ => FakeReply::ok(""),
        }
    }
}

fn lines(set: &BTreeSet<String>) -> String {
    set.iter().map(|l| format!("{l}\n")).collect()
}
