use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "taskhive", version, about = "Coordination engine for an autonomous worker fleet")]
pub struct Cli {
    /// Verbose (debug) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Root directory holding the .taskhive data directory.
    #[arg(long, global = true, default_value = ".")]
    pub root: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory and a default configuration.
    Init,

    /// Watch a repository (owner/repo).
    Watch { slug: String },

    /// Stop watching a repository.
    Unwatch { slug: String },

    /// Show watched workspaces and queue depth.
    Status,

    /// Run one full poll cycle across all watched workspaces.
    Poll,

    /// Inspect a durable queue.
    Queue {
        #[arg(value_enum)]
        kind: QueueKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum QueueKind {
    Actions,
    Commitments,
}
