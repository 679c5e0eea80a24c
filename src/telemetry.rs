//! Process-wide logging setup.
//!
//! Installs a `tracing-subscriber` formatter that writes `ERROR` events to
//! stderr and everything else to stdout. That split is what makes the access
//! log's two sinks land on two streams. Filtering follows `RUST_LOG`
//! (default `info`).
//!
//! Libraries never call this; applications call it once at the top of `main`.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::{MakeWriterExt, OrElse, WithMaxLevel};

use crate::error::Error;

/// Output format of the process log.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Human-readable, one line per event.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(format: LogFormat) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = split(std::io::stderr, std::io::stdout);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    result.map_err(|e| Error::Telemetry(e.to_string()))
}

/// `ERROR` events go to `errors`, everything else to `rest`.
fn split<E, R>(errors: E, rest: R) -> OrElse<WithMaxLevel<E>, R>
where
    E: for<'a> MakeWriter<'a>,
    R: for<'a> MakeWriter<'a>,
{
    errors.with_max_level(Level::ERROR).or_else(rest)
}
