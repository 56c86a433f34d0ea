//! Order-independent comparison of two [`StateSnapshot`]s.

use serde::{Deserialize, Serialize};

use super::snapshot::{HostState, ResourceKind, StateSnapshot};

/// Lines listed per side in rendered evidence.
const EVIDENCE_LINES: usize = 25;

/// Discrepancy for one (host, resource kind) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub host: String,
    pub resource: ResourceKind,
    /// Present in the later snapshot only.
    pub added: Vec<String>,
    /// Present in the baseline only.
    pub removed: Vec<String>,
}

impl SnapshotDiff {
    pub fn evidence(&self) -> String {
        let mut lines = Vec::new();
        for (sign, items) in [("+", &self.added), ("-", &self.removed)] {
            for item in items.iter().take(EVIDENCE_LINES) {
                lines.push(format!("{sign} {item}"));
            }
            if items.len() > EVIDENCE_LINES {
                lines.push(format!("{sign} ... {} more", items.len() - EVIDENCE_LINES));
            }
        }
        lines.join("\n")
    }
}

/// Diff `later` against `baseline`.
///
/// Resource kinds unavailable on either side are skipped. A host missing
/// from one snapshot is compared against an empty state.
pub fn diff_snapshots(baseline: &StateSnapshot, later: &StateSnapshot) -> Vec<SnapshotDiff> {
    let empty = HostState::default();
    let mut hosts: Vec<&String> = baseline.per_host.keys().chain(later.per_host.keys()).collect();
    hosts.sort();
    hosts.dedup();

    let mut diffs = Vec::new();
    for host in hosts {
        let before = baseline.per_host.get(host).unwrap_or(&empty);
        let after = later.per_host.get(host).unwrap_or(&empty);

        for kind in ResourceKind::ALL {
            if before.unavailable.contains(&kind) || after.unavailable.contains(&kind) {
                continue;
            }
            let (b, a) = (before.resources(kind), after.resources(kind));
            if a == b {
                continue;
            }
            diffs.push(SnapshotDiff {
                host: host.clone(),
                resource: kind,
                added: a.difference(b).cloned().collect(),
                removed: b.difference(a).cloned().collect(),
            });
        }
    }
    diffs
}
