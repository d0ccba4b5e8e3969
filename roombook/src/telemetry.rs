//! Tracing subscriber initialisation.
//!
//! Log verbosity is controlled with the standard `RUST_LOG` environment variable and defaults to
//! `info`. For example:
//!
//! ```bash
//! RUST_LOG=roombook=debug,sqlx=warn,tower_http=debug roombook -f config.yaml
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber: an `EnvFilter` plus a console `fmt` layer.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}
