//! Logging setup for the inkgps CLI.
//!
//! Logs go to stderr so stdout stays clean for frame output. The filter
//! comes from `RUST_LOG` when set, otherwise `info` (`debug` with
//! `--verbose`).

use std::io;

use tracing_subscriber::EnvFilter;

pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
