//! Logging initialization for airscan-daemon.
//!
//! The configured `[general].log_level` applies to the airscan crates.
//! Dependencies (the mDNS responder, hyper, axum) log at `warn` at most.
//! `RUST_LOG`, when set, replaces these directives entirely.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use airscan_core::config::GeneralConfig;

/// Crates whose events follow the configured level.
const WORKSPACE_TARGETS: &[&str] = &["airscan_core", "airscan_escl", "airscan_daemon"];

/// Initialize the global tracing subscriber. Call once, at startup.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&config.log_level))
            .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", config.log_level, e))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format.as_str() {
        "json" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false),
            )
            .try_init(),
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(false))
            .try_init(),
        other => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            ));
        }
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {}", e))
}

/// Filter directives for `level`: airscan crates at `level`, everything
/// else at `warn` (or `error` when that is quieter).
fn default_directives(level: &str) -> String {
    let dependencies = if level.eq_ignore_ascii_case("error") {
        "error"
    } else {
        "warn"
    };
    let mut directives = dependencies.to_owned();
    for target in WORKSPACE_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}
