//! Structured telemetry initialisation for the worker.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use stepworker_config::{Config, LogFormat};
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// Later calls return a fresh [`TelemetryHandle`] without touching the
/// global state, whatever configuration they carry.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter and
/// [`TelemetryError::Subscriber`] when another subscriber is already
/// installed.
///
/// # Examples
///
/// ```rust
/// use stepworker_config::Config;
///
/// # fn main() -> Result<(), stepworker::TelemetryError> {
/// let config = Config::default();
/// let first = stepworker::initialise_telemetry(&config)?;
/// let second = stepworker::initialise_telemetry(&config)?;
/// drop((first, second));
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config.log_filter(), config.log_format()))
        .map(|_| TelemetryHandle)
}

fn parse_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(expression).map_err(|error| TelemetryError::Filter(error.to_string()))
}

fn install_subscriber(expression: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = parse_filter(expression)?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("info")]
    #[case("stepworker_plugins=debug,warn")]
    #[case("off")]
    fn filter_expressions_parse(#[case] expression: &str) {
        parse_filter(expression).expect("filter should parse");
    }

    #[rstest]
    fn malformed_filter_is_rejected() {
        let error = install_subscriber("stepworker=loudest", LogFormat::Compact)
            .expect_err("filter must not parse");
        assert!(matches!(error, TelemetryError::Filter(_)));
    }

    #[rstest]
    fn repeated_initialisation_is_idempotent() {
        let config = Config {
            log_filter: String::from("off"),
            ..Config::default()
        };
        initialise(&config).expect("first initialisation");
        initialise(&config).expect("second initialisation");
    }
}
