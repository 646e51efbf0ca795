use tracing_subscriber::EnvFilter;

use crate::error::CliError;

/// `--log-level` wins over `RUST_LOG`; with neither only warnings are shown.
pub fn filter(level: Option<&str>) -> Result<EnvFilter, CliError> {
    match level {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| CliError::Argument(format!("invalid log level `{directive}`: {e}"))),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))),
    }
}

/// Installs the stderr subscriber. Stdout stays reserved for command output.
pub fn init(level: Option<&str>) -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
