//! Tracing setup for hosts embedding the engine
//!
//! The engine itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call [`init_tracing`] once at startup.

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber; `RUST_LOG` overrides the configured level
pub fn init_tracing(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    }
}
