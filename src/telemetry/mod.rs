//! Tracing-subscriber initialisation (SPEC_FULL.md §1 "Logging"). The core
//! scheduling path emits `tracing` spans/events rather than writing to
//! stdout directly; this module only wires up where those events go.

use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. `json` selects the machine-readable
/// format used in cluster deployments; plain text is left for local runs
/// (SPEC_FULL.md §1).
pub fn init(json: bool) {
    if json {
        tracing_subscriber::fmt().with_env_filter(filter()).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }
}
