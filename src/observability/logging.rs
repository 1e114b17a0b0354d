//! Structured logging.
//!
//! `tracing` events go through a `tracing-subscriber` registry with an
//! `EnvFilter`. `RUST_LOG` wins over the configured level.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(log_level: &str) -> String {
    let level = log_level.to_ascii_lowercase();
    format!("forward_proxy={level},tower_http={level}")
}

/// Install the global subscriber. Call once, at startup.
pub fn init(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(log_level).into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
