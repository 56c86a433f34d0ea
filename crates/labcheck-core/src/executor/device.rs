//! Device classes and capability negotiation.
//!
//! A small set of discriminator queries picks one of a closed set of device
//! classes. Everything class-specific (timeout multiplier, health-check
//! command, snapshot probes) hangs off [`DeviceClass`] instead of being
//! branched on hostnames.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RemoteSession;

/// Timeout for each discriminator query.
const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Linux,
    Cisco,
    Juniper,
}

impl DeviceClass {
    /// Multiplier applied to caller-supplied base timeouts.
    pub fn default_timeout_multiplier(self) -> f64 {
        match self {
            DeviceClass::Linux => 1.0,
            DeviceClass::Cisco => 2.0,
            DeviceClass::Juniper => 2.5,
        }
    }

    /// Cheap no-op used to health-check a pooled session before reuse.
    pub fn health_check_command(self) -> &'static str {
        match self {
            DeviceClass::Linux => "true",
            DeviceClass::Cisco => "show clock",
            DeviceClass::Juniper => "show system uptime",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Linux => "linux",
            DeviceClass::Cisco => "cisco",
            DeviceClass::Juniper => "juniper",
        }
    }

    /// Classify a `show version` style banner.
    fn from_banner(banner: &str) -> Option<Self> {
        let lower = banner.to_ascii_lowercase();
        if lower.contains("junos") {
            Some(DeviceClass::Juniper)
        } else if lower.contains("cisco") || lower.contains("ios-xe") || lower.contains("nx-os") {
            Some(DeviceClass::Cisco)
        } else {
            None
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determine the device class of a freshly opened session.
///
/// `uname -s` identifies Linux hosts; otherwise `show version` is matched
/// against known network OS banners. Falls back to Linux.
pub async fn negotiate(session: &dyn RemoteSession) -> DeviceClass {
    if let Ok(out) = session.run("uname -s", NEGOTIATION_TIMEOUT).await {
        if out.success() && out.stdout.trim().eq_ignore_ascii_case("linux") {
            return DeviceClass::Linux;
        }
    }

    if let Ok(out) = session.run("show version", NEGOTIATION_TIMEOUT).await {
        if let Some(class) = DeviceClass::from_banner(&out.stdout) {
            debug!(class = %class, "negotiated device class from banner");
            return class;
        }
    }

    DeviceClass::Linux
}
