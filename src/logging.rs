//! Logging & tracing (C11). Ambient, not a spec.md component, but wired the
//! same way `deployer/src/main.rs` and `gateway/src/main.rs` set up
//! `tracing_subscriber`: an `EnvFilter` layer (default `info`, overridable via
//! `RUST_LOG`) plus an `fmt` layer, installed once before anything else runs.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// `verbosity` is the number of times `-v` was passed on the command line
/// (C13); each occurrence lowers the default filter by one level.
pub fn init(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .init();
}
