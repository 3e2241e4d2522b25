//! Log subscriber installation.

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::DagflowError;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` overrides `config.level` when set.
///
/// # Errors
///
/// Returns `DagflowError::Config` if the level is not a valid filter or a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), DagflowError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| DagflowError::Config(format!("Failed to install log subscriber: {e}")))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, DagflowError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| DagflowError::Config(format!("Invalid log level '{}': {e}", config.level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_config_error() {
        let config = LoggingConfig::default().with_level("warn");
        let _ = init_logging(&config);

        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, DagflowError::Config(_)));
    }

    #[test]
    fn test_filter_from_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter(&LoggingConfig::default().with_level("dagflow=debug")).is_ok());
    }
}
