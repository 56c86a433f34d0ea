//! Log subscriber setup for the `labcheck` binary.
//!
//! Logs always go to stderr: stdout carries the JSON result tree.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level. Everything else is
/// limited to warnings so pool and executor chatter is not buried under
/// dependency output.
const LABCHECK_TARGETS: &[&str] = &["labcheck_core", "labcheck"];

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    let level = level.as_str().to_ascii_lowercase();
    directives.extend(LABCHECK_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides `level`.
///
/// Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    // A subscriber set by an earlier call (or a test harness) stays in place.
    installed.ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_level_to_labcheck() {
        let filter = default_filter(Level::DEBUG);
        assert_eq!(filter, "warn,labcheck_core=debug,labcheck=debug");
        assert!(EnvFilter::try_new(&filter).is_ok());
    }
}
