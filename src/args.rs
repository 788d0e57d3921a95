//! CLI surface (C13). Mirrors `deployer/src/args.rs` and `gateway/src/args.rs`:
//! a small `clap` derive struct parsed once in `main`.

use std::path::PathBuf;

use clap::Parser;

/// Multi-tenant static-site deployment server.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Path to the YAML configuration file. Overrides `$WEBPLOY_CONFIG` and
    /// the `/etc/webploy/webploy.conf` default.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity. Repeatable (`-vv` for trace).
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
