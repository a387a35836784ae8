//! Command-line interface for Whereabouts
//!
//! Provides main commands:
//! - `init` - Generate the local identity
//! - `export` - Print the public identity to hand to friends
//! - `friend` - Add, remove and list friends
//! - `run` - Run the daemon

mod friend;
mod identity;
mod run;

pub use friend::run_friend;
pub use identity::{run_export, run_init};
pub use run::run_daemon;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Whereabouts - share your status with friends over Tor
#[derive(Parser, Debug)]
#[command(name = "whereabouts")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a new local identity
    Init(InitArgs),

    /// Print the public identity for friends to import
    Export(ExportArgs),

    /// Manage friends
    Friend(FriendArgs),

    /// Run the daemon
    Run,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Nickname shown to friends
    #[arg(short, long)]
    pub nickname: String,

    /// Replace an existing identity
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct FriendArgs {
    #[command(subcommand)]
    pub command: FriendCommand,
}

#[derive(Subcommand, Debug)]
pub enum FriendCommand {
    /// Import a friend from their exported public identity
    Add {
        /// JSON file produced by `whereabouts export`
        file: PathBuf,
    },

    /// Remove a friend by id
    Remove { id: String },

    /// List friends
    List,
}
