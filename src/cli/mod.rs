//! Command-line interface definitions.

mod commands;

pub use commands::{Cli, Commands, QueueKind};
