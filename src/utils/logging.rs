//! # Logging
//!
//! Installs a `tracing` subscriber from [`LoggingConfig`].
//!
//! Output goes to stderr. `RUST_LOG` directives take precedence over the configured
//! level so a single module can be turned up without touching the config file.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// # Errors
/// `ProtocolError::ConfigError` when a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.log_to_console {
        return Ok(());
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.with_ansi(false).try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_console_is_a_no_op() {
        let config = LoggingConfig {
            log_to_console: false,
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
