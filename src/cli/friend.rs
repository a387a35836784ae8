//! Friend management commands
//!
//! These edit the data directory directly. A running daemon picks the
//! change up on its next restart (SIGHUP).

use super::{FriendArgs, FriendCommand};
use crate::config::Config;
use crate::data::{Friend, JsonStore, PublicIdentity, Store};
use crate::error::Error;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

pub fn run_friend(config: &Config, args: &FriendArgs) -> Result<()> {
    let store = JsonStore::open(&config.data.dir)?;

    match &args.command {
        FriendCommand::Add { file } => add_friend(&store, file),
        FriendCommand::Remove { id } => {
            store.delete_friend(id)?;
            println!("Removed friend {}", id);
            Ok(())
        },
        FriendCommand::List => {
            let friends = store.get_friends()?;
            if friends.is_empty() {
                println!("No friends yet");
            }
            for friend in friends {
                println!("{}  {}  {}", friend.id, friend.nickname, friend.hidden_service_address);
            }
            Ok(())
        },
    }
}

fn add_friend(store: &JsonStore, file: &Path) -> Result<()> {
    let contents =
        fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    let public: PublicIdentity = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse public identity in {:?}", file))?;
    let friend = Friend::from_public_identity(public)?;

    match store.get_self() {
        Ok(identity) if friend.is_identity(&identity) => {
            bail!("{:?} is your own identity", file)
        },
        Ok(_) | Err(Error::SelfNotFound) => {},
        Err(e) => return Err(e.into()),
    }

    let inserted = store.insert_or_update_friend(&friend)?;
    println!(
        "{} friend {} ({})",
        if inserted { "Added" } else { "Updated" },
        friend.nickname,
        friend.id
    );
    Ok(())
}
