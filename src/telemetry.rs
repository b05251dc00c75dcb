//! Tracing subscriber initialization (ambient stack).
//!
//! This crate never installs a global subscriber on its own — that
//! decision belongs to the embedding application — but provides the same
//! `tracing-subscriber` wiring `knhk-workflow-engine`'s binaries use, for
//! applications that just want a sensible default.

use tracing_subscriber::EnvFilter;

use crate::config::EnvironmentProfile;

/// Install a process-global tracing subscriber appropriate for `profile`:
/// compact human-readable output for development/testing, structured JSON
/// for staging/production. Respects `RUST_LOG` via `EnvFilter` if set,
/// otherwise defaults to `info`.
pub fn init_tracing(profile: EnvironmentProfile) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if profile.use_json_logs() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
