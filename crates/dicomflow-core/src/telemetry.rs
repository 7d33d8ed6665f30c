//! Tracing subscriber installation
//!
//! Library code only emits `tracing` events; the embedding process decides
//! where they go by calling [`init_tracing`] once at startup.

use crate::config::LoggingConfig;
use crate::error::ConfigError;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber
///
/// `RUST_LOG` takes precedence over `config.filter` when set.
///
/// # Errors
/// - `ConfigError::Logging` if the filter is invalid or a global subscriber
///   is already installed
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| ConfigError::Logging(format!("invalid filter '{}': {e}", config.filter))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_an_error_not_a_panic() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);

        let second = init_tracing(&config);
        assert!(matches!(second, Err(ConfigError::Logging(_))));
    }
}
