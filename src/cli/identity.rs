//! Identity commands

use super::{ExportArgs, InitArgs};
use crate::config::Config;
use crate::crypto::{CredentialGenerator, LocalCredentialGenerator};
use crate::data::{JsonStore, Store};
use crate::error::Error;
use anyhow::{bail, Context, Result};
use std::fs;

/// Generate and store a new local identity
pub fn run_init(config: &Config, args: &InitArgs) -> Result<()> {
    let store = JsonStore::open(&config.data.dir)?;

    match store.get_self() {
        Ok(existing) if !args.force => bail!(
            "An identity already exists ({}). Use --force to replace it.",
            existing.hidden_service_address
        ),
        Ok(_) | Err(Error::SelfNotFound) => {},
        Err(e) => return Err(e.into()),
    }

    println!("Generating identity for {}...", args.nickname);
    let identity = LocalCredentialGenerator.generate(&args.nickname)?;
    store.update_self(&identity)?;

    println!("Nickname: {}", identity.nickname);
    println!("Address:  {}", identity.hidden_service_address);
    println!("Stored in {:?}", store.dir());
    println!("\nRun `whereabouts export` to share your public identity with friends.");
    Ok(())
}

/// Write the public identity as JSON
pub fn run_export(config: &Config, args: &ExportArgs) -> Result<()> {
    let store = JsonStore::open(&config.data.dir)?;
    let identity = store
        .get_self()
        .context("No identity yet, run `whereabouts init` first")?;

    let json = serde_json::to_string_pretty(&identity.public_identity())?;
    match &args.output {
        Some(path) => {
            fs::write(path, json + "\n")
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!("Public identity written to {:?}", path);
        },
        None => println!("{}", json),
    }
    Ok(())
}
