//! Tracing initialisation for the `sortie` binary.
//!
//! Progress events go to stderr so standard output carries only command
//! output.

use std::io;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Picks the default verbosity for the `--verbose` flag.
#[must_use]
pub const fn default_level(verbose: bool) -> Level {
    if verbose { Level::DEBUG } else { Level::INFO }
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. When `json` is set, events are
/// emitted as newline-delimited JSON. Only the first call in a process takes
/// effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init()
            .ok();
    }
}
