//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};

use crate::domain::NodeShape;

/// Fair per-client request selection: simulate and inspect sectored random-grab trees
#[derive(Parser, Debug)]
#[command(name = "grabtree")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-d info, -dd debug, -ddd trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Config file layered over the global config
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath, env = "GRABTREE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Select with immediate re-queue and report each client's share
    Fairness {
        #[command(flatten)]
        tree: TreeArgs,
        /// Number of selections
        #[arg(short, long)]
        trials: Option<usize>,
    },

    /// Drain the tree from parallel workers and verify at-most-once delivery
    Drain {
        #[command(flatten)]
        tree: TreeArgs,
        /// Concurrent drainers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Cancel every n-th request before draining
        #[arg(long, value_name = "N")]
        cancel_every: Option<usize>,
    },

    /// Print a populated tree
    Tree {
        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Tree population shared by the simulation commands.
#[derive(Args, Debug, Clone, Default)]
pub struct TreeArgs {
    /// Queue depth of one client; repeat once per client
    #[arg(long = "client", value_name = "DEPTH")]
    pub clients: Vec<usize>,

    /// RNG seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Root node variant
    #[arg(long, value_enum)]
    pub root: Option<RootArg>,

    /// Mark tree and requests as durable
    #[arg(long)]
    pub durable: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootArg {
    /// One sector per client
    Branch,
    /// Single flat bag
    Leaf,
}

impl From<RootArg> for NodeShape {
    fn from(root: RootArg) -> Self {
        match root {
            RootArg::Branch => NodeShape::Branch,
            RootArg::Leaf => NodeShape::Leaf,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Print a commented template
    Template,
    /// Print the global config file location
    Path,
}
