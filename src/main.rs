//! Whereabouts - friend-to-friend status sharing over Tor
//!
//! Every user runs a hidden service that serves their current status to
//! friends over mutual TLS, and polls each friend's hidden service in turn.
//! There is no central server.
//!
//! # Usage
//!
//! ```bash
//! # Create an identity
//! whereabouts init --nickname alice
//!
//! # Hand the public identity to a friend
//! whereabouts export --output alice.json
//!
//! # Import a friend's public identity
//! whereabouts friend add bob.json
//!
//! # Run daemon
//! whereabouts run
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use whereabouts::cli::{self, Cli, Commands};
use whereabouts::{config, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        logging::init_with_level(Level::DEBUG);
    } else {
        logging::init();
    }

    let config_path = cli.config.as_deref();
    let config = config::load_config(config_path)?;

    match &cli.command {
        Commands::Init(args) => cli::run_init(&config, args)?,
        Commands::Export(args) => cli::run_export(&config, args)?,
        Commands::Friend(args) => cli::run_friend(&config, args)?,
        Commands::Run => cli::run_daemon(config_path, config).await?,
    }

    Ok(())
}
