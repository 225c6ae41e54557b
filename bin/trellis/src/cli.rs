//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Trellis - transport address tracking and set reconciliation daemon
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// TOML configuration file. Defaults apply when absent.
    #[arg(long, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,

    /// Hex-encoded 32 byte ed25519 seed for the local identity.
    /// A fresh identity is generated when omitted.
    #[arg(long = "identity-seed", value_name = "HEX")]
    pub(crate) identity_seed: Option<String>,

    #[command(flatten)]
    pub(crate) logs: LogArgs,
}

#[derive(Debug, Clone, Default, clap::Args)]
pub(crate) struct LogArgs {
    /// Silence all output
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "trellis_set=trace,trellis_net_addresses=debug").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    pub(crate) filter: Option<String>,
}
