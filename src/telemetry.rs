//! Log output setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{ChatError, Result};

/// `RUST_LOG` wins over the configured filter.
fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|err| ChatError::Config(format!("invalid log filter `{}`: {err}", config.filter)))
}

/// Install the global subscriber, human-readable or JSON lines.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config)?);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|err| ChatError::Config(format!("tracing already initialised: {err}")))
}
