//! Structured logging.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,marquee=debug,sqlx=warn,tower_http=debug";

/// Install the global `fmt` subscriber, filtered by `RUST_LOG`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}
