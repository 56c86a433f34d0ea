//! Post-teardown state capture for every declared target.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::normalize::Normalizer;
use crate::domain::ExerciseContext;
use crate::executor::DeviceClass;
use crate::pool::{ConnectionPool, PoolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Files,
    Services,
    Users,
    Packages,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Files,
        ResourceKind::Services,
        ResourceKind::Users,
        ResourceKind::Packages,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Files => "files",
            ResourceKind::Services => "services",
            ResourceKind::Users => "users",
            ResourceKind::Packages => "packages",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe commands for one device class. `None` means the kind is not probed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeSet {
    pub files: Option<String>,
    pub services: Option<String>,
    pub users: Option<String>,
    pub packages: Option<String>,
}

impl ProbeSet {
    pub fn command(&self, kind: ResourceKind) -> Option<&str> {
        match kind {
            ResourceKind::Files => self.files.as_deref(),
            ResourceKind::Services => self.services.as_deref(),
            ResourceKind::Users => self.users.as_deref(),
            ResourceKind::Packages => self.packages.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotProbes {
    pub linux: ProbeSet,
    pub cisco: ProbeSet,
    pub juniper: ProbeSet,
    pub timeout_secs: u64,
}

impl Default for SnapshotProbes {
    fn default() -> Self {
        Self {
            linux: ProbeSet {
                files: Some(
                    "find /etc /home /opt /srv /var/www -xdev -printf '%p %s\\n' 2>/dev/null; true"
                        .to_string(),
                ),
                services: Some(
                    "systemctl list-units --type=service --all --no-legend --plain | awk '{print $1, $3, $4}'"
                        .to_string(),
                ),
                users: Some("getent passwd | cut -d: -f1,3,6,7".to_string()),
                packages: Some(
                    "rpm -qa 2>/dev/null || dpkg-query -W -f='${Package} ${Version}\\n'".to_string(),
                ),
            },
            cisco: ProbeSet {
                files: Some("show running-config".to_string()),
                ..ProbeSet::default()
            },
            juniper: ProbeSet {
                files: Some("show configuration | display set".to_string()),
                ..ProbeSet::default()
            },
            timeout_secs: 120,
        }
    }
}

impl SnapshotProbes {
    pub fn for_class(&self, class: DeviceClass) -> &ProbeSet {
        match class {
            DeviceClass::Linux => &self.linux,
            DeviceClass::Cisco => &self.cisco,
            DeviceClass::Juniper => &self.juniper,
        }
    }
}

/// Normalized observable state of one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostState {
    pub files: BTreeSet<String>,
    pub services: BTreeSet<String>,
    pub users: BTreeSet<String>,
    pub packages: BTreeSet<String>,
    /// Kinds whose probe failed or is not defined; ignored when diffing.
    pub unavailable: BTreeSet<ResourceKind>,
}

impl HostState {
    pub fn resources(&self, kind: ResourceKind) -> &BTreeSet<String> {
        match kind {
            ResourceKind::Files => &self.files,
            ResourceKind::Services => &self.services,
            ResourceKind::Users => &self.users,
            ResourceKind::Packages => &self.packages,
        }
    }

    fn resources_mut(&mut self, kind: ResourceKind) -> &mut BTreeSet<String> {
        match kind {
            ResourceKind::Files => &mut self.files,
            ResourceKind::Services => &mut self.services,
            ResourceKind::Users => &mut self.users,
            ResourceKind::Packages => &mut self.packages,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub per_host: BTreeMap<String, HostState>,
}

impl StateSnapshot {
    /// Probe every declared target of `exercise`.
    ///
    /// A failing probe marks its kind unavailable on that host. Losing a
    /// target is returned as an error since nothing else can be compared.
    pub async fn capture(
        pool: &ConnectionPool,
        exercise: &ExerciseContext,
        probes: &SnapshotProbes,
        normalizer: &Normalizer,
    ) -> Result<Self, PoolError> {
        let timeout = Duration::from_secs(probes.timeout_secs);
        let mut per_host = BTreeMap::new();

        for target in &exercise.targets {
            let conn = pool.acquire(target).await?;
            let probe_set = probes.for_class(conn.device_class());
            let mut state = HostState::default();

            for kind in ResourceKind::ALL {
                let Some(command) = probe_set.command(kind) else {
                    state.unavailable.insert(kind);
                    continue;
                };
                match pool.run(&conn, command, timeout).await {
                    Ok(out) if out.success() => {
                        *state.resources_mut(kind) = normalizer.normalize(&out.stdout);
                    }
                    Ok(out) => {
                        debug!(target_name = %target.name, %kind, exit_code = out.exit_code, "probe failed");
                        state.unavailable.insert(kind);
                    }
                    Err(e) if e.is_connectivity() => return Err(e),
                    Err(e) => {
                        debug!(target_name = %target.name, %kind, error = %e, "probe failed");
                        state.unavailable.insert(kind);
                    }
                }
            }
            per_host.insert(target.name.clone(), state);
        }

        Ok(Self { per_host })
    }
}
