//! CLI argument definitions for the livetree binary.

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

/// livetree replicated document tree
#[derive(Parser, Debug)]
#[command(name = "livetree")]
#[command(about = "livetree: replicated document tree with server-ordered convergence")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run several clients against an in-process server and check that they converge
    Simulate(SimulateArgs),
}

/// Arguments for the simulate command
#[derive(clap::Args, Debug)]
pub struct SimulateArgs {
    /// Number of concurrent clients
    #[arg(short, long, default_value_t = 3, env = "LIVETREE_CLIENTS")]
    pub clients: usize,

    /// Edit rounds; every client makes one edit per round
    #[arg(short, long, default_value_t = 20, env = "LIVETREE_ROUNDS")]
    pub rounds: usize,

    /// Seed for the edit generator. Random when omitted
    #[arg(short, long, env = "LIVETREE_SEED")]
    pub seed: Option<u64>,

    /// Take the first client offline for the middle third of the rounds
    #[arg(long, env = "LIVETREE_OFFLINE")]
    pub offline: bool,

    /// Include list moves in the edit mix.
    /// Concurrent moves of the same item are not guaranteed to converge
    #[arg(long, env = "LIVETREE_MOVES")]
    pub moves: bool,

    /// Minimum delay between two outbound flushes of a client
    #[arg(long, default_value_t = 20, env = "LIVETREE_THROTTLE_MS")]
    pub throttle_ms: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human", env = "LIVETREE_FORMAT")]
    pub format: OutputFormat,
}
