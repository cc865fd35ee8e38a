//! Tracing initialisation for the daemon.
//!
//! Logs go to stderr so they never mix with protocol traffic. The filter
//! expression comes from configuration and follows `tracing_subscriber`'s
//! `EnvFilter` syntax, e.g. `info,graphgated::router=debug`.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter expression did not parse.
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        /// The rejected filter expression.
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    /// A global subscriber was already installed by other means.
    #[error("failed to install tracing subscriber: {source}")]
    Subscriber {
        #[source]
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

/// Installs the global subscriber once; repeated calls are no-ops so tests
/// can initialise freely.
pub(crate) fn init(filter: &str) -> Result<(), TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install(filter))
        .map(|_| ())
}

fn install(filter: &str) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_new(filter).map_err(|source| TelemetryError::Filter {
        filter: filter.to_string(),
        source,
    })?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|source| TelemetryError::Subscriber { source })
}
