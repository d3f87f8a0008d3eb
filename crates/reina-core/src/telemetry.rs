//! Tracing setup for the `reina` binary.
//!
//! Log lines go to stderr. Stdout is reserved for command output, so
//! `reina --json` can be piped straight into a JSON consumer.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stderr.
///
/// `level` applies when `RUST_LOG` is not set. Only the first call in a
/// process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    subscriber(json, filter, std::io::stderr).try_init().ok();
}

/// Build a subscriber emitting plain or newline-delimited JSON lines to `writer`.
pub fn subscriber<W>(json: bool, filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(writer.clone())
            .json()
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
}
