use tracing_subscriber::EnvFilter;

use crate::infra::{config::LogConfig, error::SetupError};

/// Installs the global tracing subscriber for binary hosts. Library
/// consumers that bring their own subscriber should skip this.
pub fn init(config: &LogConfig) -> Result<(), SetupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)),
        )
        .with_target(true)
        .try_init()
        .map_err(SetupError::LoggingInit)
}
