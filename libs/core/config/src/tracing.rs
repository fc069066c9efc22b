use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
///
/// Production keeps pipeline lifecycle logs (daemon start/stop, consumer
/// counters) and drops per-message debug output.
pub fn default_filter(environment: &Environment) -> &'static str {
    if environment.is_production() {
        "warn,stream_pipeline=info,messaging=info"
    } else {
        "info,stream_pipeline=debug,messaging=debug"
    }
}

/// Install color-eyre with a project-standard configuration.
///
/// Shows the file:line where errors occur and hides environment variables.
/// Safe to call multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize tracing with environment-aware output and error span capture.
///
/// - **Production** (`APP_ENV=production`): flattened JSON lines for log
///   aggregation, no module targets
/// - **Development** (default): pretty, human-readable output
///
/// Both include an `ErrorLayer` so eyre reports carry span traces. `RUST_LOG`
/// overrides [`default_filter`].
///
/// Calling this more than once is a no-op, which keeps tests that share a
/// process from failing.
pub fn init_tracing(environment: &Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(environment)));

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(()) => info!(environment = ?environment, "tracing initialized"),
        Err(_) => debug!("tracing already initialized, skipping"),
    }
}
