//! Connection pool: reusable per-target sessions with retry, health checks,
//! device-class timeouts and per-target serialization.
//!
//! # Modules
//!
//! - [`retry`] — `RetryPolicy`, `retry_with_backoff()`
//!
//! Commands against one target never interleave, even across concurrent
//! exercise workers: every target owns one async lock, held for the duration
//! of each command and of each (re)connect.

pub mod retry;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::counters::COUNTERS;
use crate::domain::TargetSpec;
use crate::executor::{
    negotiate, CommandOutput, DeviceClass, ExecutorError, RemoteExecutor, RemoteSession,
};

pub use retry::{retry_with_backoff, RetryPolicy};

/// Base timeout for the health-check no-op, before the class multiplier.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-device-class timeout multiplier overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceTimeouts {
    pub linux: Option<f64>,
    pub cisco: Option<f64>,
    pub juniper: Option<f64>,
}

impl DeviceTimeouts {
    pub fn multiplier(&self, class: DeviceClass) -> f64 {
        let override_value = match class {
            DeviceClass::Linux => self.linux,
            DeviceClass::Cisco => self.cisco,
            DeviceClass::Juniper => self.juniper,
        };
        override_value.unwrap_or_else(|| class.default_timeout_multiplier())
    }

    pub(crate) fn overrides(&self) -> impl Iterator<Item = (DeviceClass, f64)> + '_ {
        [
            (DeviceClass::Linux, self.linux),
            (DeviceClass::Cisco, self.cisco),
            (DeviceClass::Juniper, self.juniper),
        ]
        .into_iter()
        .filter_map(|(class, value)| value.map(|v| (class, v)))
    }
}

/// Pool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub retry: RetryPolicy,
    pub device_timeouts: DeviceTimeouts,
}

/// Errors surfaced to checks by the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Acquisition retries exhausted or the session died mid-command.
    #[error("target {target} unreachable after {attempts} attempt(s): {reason}")]
    Connectivity {
        target: String,
        attempts: u32,
        reason: String,
    },

    /// Command still timed out after one retry at twice the timeout.
    #[error("command `{command}` on {target} timed out after {timeout_ms}ms")]
    CommandTimeout {
        target: String,
        command: String,
        timeout_ms: u64,
    },

    #[error("command on {target} failed: {reason}")]
    Execution { target: String, reason: String },
}

impl PoolError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, PoolError::Connectivity { .. })
    }
}

#[derive(Default)]
struct Slot {
    session: Option<Arc<dyn RemoteSession>>,
    class: Option<DeviceClass>,
}

/// Handle to a pooled session on one target.
#[derive(Clone)]
pub struct Connection {
    target: String,
    class: DeviceClass,
    multiplier: f64,
    slot: Arc<Mutex<Slot>>,
}

impl Connection {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn device_class(&self) -> DeviceClass {
        self.class
    }

    pub fn timeout_multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("class", &self.class)
            .field("multiplier", &self.multiplier)
            .finish()
    }
}

/// Pool of reusable sessions keyed by target name.
pub struct ConnectionPool {
    executor: Arc<dyn RemoteExecutor>,
    config: PoolConfig,
    slots: StdMutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl ConnectionPool {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: PoolConfig) -> Self {
        Self {
            executor,
            config,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn slot(&self, target: &str) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(target.to_string()).or_default().clone()
    }

    fn connection(&self, target: &TargetSpec, class: DeviceClass, slot: &Arc<Mutex<Slot>>) -> Connection {
        Connection {
            target: target.name.clone(),
            class,
            multiplier: self.config.device_timeouts.multiplier(class),
            slot: Arc::clone(slot),
        }
    }

    /// Acquire a connection to `target`.
    ///
    /// A pooled session is health-checked first. If the check fails, exactly
    /// one reconnect is attempted; if that fails too, the session is evicted
    /// and one fresh acquisition (with full backoff) is made.
    #[instrument(skip(self, target), fields(target_name = %target.name))]
    pub async fn acquire(&self, target: &TargetSpec) -> Result<Connection, PoolError> {
        let slot = self.slot(&target.name);
        let mut guard = slot.lock().await;

        if let (Some(session), Some(class)) = (guard.session.clone(), guard.class) {
            if self.healthy(session.as_ref(), class).await {
                return Ok(self.connection(target, class, &slot));
            }

            warn!("pooled session failed health check, reconnecting");
            COUNTERS.inc_reconnects();
            if let Ok(fresh) = self.executor.connect(target).await {
                if self.healthy(fresh.as_ref(), class).await {
                    guard.session = Some(fresh);
                    return Ok(self.connection(target, class, &slot));
                }
            }

            warn!("reconnect failed, evicting pooled session");
            guard.session = None;
            guard.class = None;
        }

        let session = self.connect_with_retry(target).await?;
        let class = match target.device_class {
            Some(class) => class,
            None => negotiate(session.as_ref()).await,
        };
        debug!(class = %class, "session established");

        guard.session = Some(session);
        guard.class = Some(class);
        Ok(self.connection(target, class, &slot))
    }

    async fn connect_with_retry(
        &self,
        target: &TargetSpec,
    ) -> Result<Arc<dyn RemoteSession>, PoolError> {
        retry_with_backoff(&self.config.retry, &target.name, |_| {
            self.executor.connect(target)
        })
        .await
        .map_err(|(e, attempts)| {
            COUNTERS.inc_connect_failures();
            PoolError::Connectivity {
                target: target.name.clone(),
                attempts,
                reason: e.to_string(),
            }
        })
    }

    async fn healthy(&self, session: &dyn RemoteSession, class: DeviceClass) -> bool {
        let timeout = HEALTH_CHECK_TIMEOUT.mul_f64(self.config.device_timeouts.multiplier(class));
        matches!(
            tokio::time::timeout(timeout, session.run(class.health_check_command(), timeout)).await,
            Ok(Ok(out)) if out.success()
        )
    }

    /// Run `command` on the connection's target.
    ///
    /// `base_timeout` is scaled by the device-class multiplier. A timed-out
    /// command is retried once at twice the scaled timeout. A dead session
    /// is evicted and reported as a connectivity failure.
    #[instrument(skip(self, conn), fields(target_name = %conn.target))]
    pub async fn run(
        &self,
        conn: &Connection,
        command: &str,
        base_timeout: Duration,
    ) -> Result<CommandOutput, PoolError> {
        let mut guard = conn.slot.lock().await;
        let session = guard
            .session
            .clone()
            .ok_or_else(|| PoolError::Connectivity {
                target: conn.target.clone(),
                attempts: 0,
                reason: "session was evicted".to_string(),
            })?;

        let timeout = base_timeout.mul_f64(conn.multiplier);
        let mut outcome = Self::run_once(session.as_ref(), command, timeout).await;

        if matches!(outcome, Err(ExecutorError::Timeout(_))) {
            warn!(command = %command, timeout_ms = timeout.as_millis() as u64, "command timed out, retrying at 2x");
            outcome = Self::run_once(session.as_ref(), command, timeout * 2).await;
        }

        match outcome {
            Ok(out) => Ok(out),
            Err(ExecutorError::Timeout(limit)) => Err(PoolError::CommandTimeout {
                target: conn.target.clone(),
                command: command.to_string(),
                timeout_ms: limit.as_millis() as u64,
            }),
            Err(e @ (ExecutorError::Connect { .. } | ExecutorError::SessionClosed(_))) => {
                warn!(error = %e, "session lost, evicting");
                guard.session = None;
                guard.class = None;
                Err(PoolError::Connectivity {
                    target: conn.target.clone(),
                    attempts: 1,
                    reason: e.to_string(),
                })
            }
            Err(e @ ExecutorError::Io(_)) => Err(PoolError::Execution {
                target: conn.target.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn run_once(
        session: &dyn RemoteSession,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutorError> {
        match tokio::time::timeout(timeout, session.run(command, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout(timeout)),
        }
    }

    /// Acquire `target` and run one command on it.
    pub async fn run_on(
        &self,
        target: &TargetSpec,
        command: &str,
        base_timeout: Duration,
    ) -> Result<CommandOutput, PoolError> {
        let conn = self.acquire(target).await?;
        self.run(&conn, command, base_timeout).await
    }

    /// Names of targets that currently hold a pooled session.
    pub async fn pooled_targets(&self) -> Vec<String> {
        let slots: Vec<(String, Arc<Mutex<Slot>>)> = {
            let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };

        let mut names = Vec::new();
        for (name, slot) in slots {
            if slot.lock().await.session.is_some() {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    /// Drop every pooled session.
    pub async fn evict_all(&self) {
        let slots: Vec<Arc<Mutex<Slot>>> = {
            let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots.values().cloned().collect()
        };
        for slot in slots {
            let mut guard = slot.lock().await;
            guard.session = None;
            guard.class = None;
        }
    }
}
