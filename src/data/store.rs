//! Identity and friend persistence
//!
//! Records are read fresh from disk on every call so a new identity or a
//! friend added by another process is picked up on the next use.
//!
//! `self.json` carries private keys. On Unix the data directory is kept at
//! mode 700 and records are written at mode 600.

use super::{Friend, Identity};
use crate::error::{Error, Result};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const SELF_FILE: &str = "self.json";
const FRIENDS_FILE: &str = "friends.json";

/// Repository for the local identity and the friend set
pub trait Store: Send + Sync {
    /// Fails with `SelfNotFound` before an identity has been generated
    fn get_self(&self) -> Result<Identity>;

    fn update_self(&self, identity: &Identity) -> Result<()>;

    fn get_friends(&self) -> Result<Vec<Friend>>;

    /// Fails with `FriendNotFound` for unknown ids
    fn get_friend_by_id(&self, id: &str) -> Result<Friend>;

    /// Returns true when the friend was newly inserted, false when updated
    fn insert_or_update_friend(&self, friend: &Friend) -> Result<bool>;

    /// Fails with `FriendNotFound` for unknown ids
    fn delete_friend(&self, id: &str) -> Result<()>;
}

/// JSON files in a data directory
pub struct JsonStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {:?}", dir))
            .map_err(Error::Storage)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .with_context(|| format!("Failed to set permissions on {:?}", dir))
                .map_err(Error::Storage)?;
        }

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(
                    anyhow::Error::new(e).context(format!("Failed to read {:?}", path)),
                ))
            },
        };
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {:?}", path))
            .map(Some)
            .map_err(Error::Storage)
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        let contents = serde_json::to_string_pretty(value)
            .context("Failed to serialize record")
            .map_err(Error::Storage)?;
        write_private(&tmp, contents.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &path))
            .with_context(|| format!("Failed to write {:?}", path))
            .map_err(Error::Storage)?;
        debug!("Wrote {:?}", path);
        Ok(())
    }

    fn friends(&self) -> Result<Vec<Friend>> {
        Ok(self.read(FRIENDS_FILE)?.unwrap_or_default())
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        lock(&self.write_lock)
    }
}

impl Store for JsonStore {
    fn get_self(&self) -> Result<Identity> {
        self.read(SELF_FILE)?.ok_or(Error::SelfNotFound)
    }

    fn update_self(&self, identity: &Identity) -> Result<()> {
        let _guard = self.lock_writes();
        self.write(SELF_FILE, identity)
    }

    fn get_friends(&self) -> Result<Vec<Friend>> {
        self.friends()
    }

    fn get_friend_by_id(&self, id: &str) -> Result<Friend> {
        self.friends()?
            .into_iter()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::FriendNotFound(id.to_string()))
    }

    fn insert_or_update_friend(&self, friend: &Friend) -> Result<bool> {
        let _guard = self.lock_writes();
        let mut friends = self.friends()?;
        let inserted = match friends.iter_mut().find(|f| f.id == friend.id) {
            Some(existing) => {
                *existing = friend.clone();
                false
            },
            None => {
                friends.push(friend.clone());
                true
            },
        };
        self.write(FRIENDS_FILE, &friends)?;
        Ok(inserted)
    }

    fn delete_friend(&self, id: &str) -> Result<()> {
        let _guard = self.lock_writes();
        let mut friends = self.friends()?;
        let before = friends.len();
        friends.retain(|f| f.id != id);
        if friends.len() == before {
            return Err(Error::FriendNotFound(id.to_string()));
        }
        self.write(FRIENDS_FILE, &friends)
    }
}

/// Records held in memory, for embedding and tests
#[derive(Default)]
pub struct MemoryStore {
    identity: Mutex<Option<Identity>>,
    friends: Mutex<Vec<Friend>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
            friends: Mutex::default(),
        }
    }
}

/// Write `contents` to a fresh file only the owner can read
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let _ = std::fs::remove_file(path);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Store for MemoryStore {
    fn get_self(&self) -> Result<Identity> {
        lock(&self.identity).clone().ok_or(Error::SelfNotFound)
    }

    fn update_self(&self, identity: &Identity) -> Result<()> {
        *lock(&self.identity) = Some(identity.clone());
        Ok(())
    }

    fn get_friends(&self) -> Result<Vec<Friend>> {
        Ok(lock(&self.friends).clone())
    }

    fn get_friend_by_id(&self, id: &str) -> Result<Friend> {
        lock(&self.friends)
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| Error::FriendNotFound(id.to_string()))
    }

    fn insert_or_update_friend(&self, friend: &Friend) -> Result<bool> {
        let mut friends = lock(&self.friends);
        match friends.iter_mut().find(|f| f.id == friend.id) {
            Some(existing) => {
                *existing = friend.clone();
                Ok(false)
            },
            None => {
                friends.push(friend.clone());
                Ok(true)
            },
        }
    }

    fn delete_friend(&self, id: &str) -> Result<()> {
        let mut friends = lock(&self.friends);
        let before = friends.len();
        friends.retain(|f| f.id != id);
        if friends.len() == before {
            return Err(Error::FriendNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CredentialGenerator, LocalCredentialGenerator};

    fn temp_store(name: &str) -> JsonStore {
        let dir = std::env::temp_dir().join(format!(
            "whereabouts-store-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        JsonStore::open(dir).unwrap()
    }

    fn friend(nickname: &str) -> Friend {
        let identity = LocalCredentialGenerator.generate(nickname).unwrap();
        Friend::from_public_identity(identity.public_identity()).unwrap()
    }

    #[test]
    fn test_self_missing_until_written() {
        let store = temp_store("self");
        assert!(matches!(store.get_self(), Err(Error::SelfNotFound)));

        let identity = LocalCredentialGenerator.generate("alice").unwrap();
        store.update_self(&identity).unwrap();
        let loaded = store.get_self().unwrap();
        assert_eq!(loaded.hidden_service_address, identity.hidden_service_address);
    }

    #[cfg(unix)]
    #[test]
    fn test_records_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let store = temp_store("private");
        let identity = LocalCredentialGenerator.generate("alice").unwrap();
        store.update_self(&identity).unwrap();
        store.update_self(&identity).unwrap();
        store.insert_or_update_friend(&friend("bob")).unwrap();

        let mode = |path: PathBuf| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(store.dir().to_path_buf()), 0o700);
        assert_eq!(mode(store.dir().join(SELF_FILE)), 0o600);
        assert_eq!(mode(store.dir().join(FRIENDS_FILE)), 0o600);
    }

    #[test]
    fn test_insert_then_update_friend() {
        let store = temp_store("insert");
        let mut bob = friend("bob");

        assert!(store.insert_or_update_friend(&bob).unwrap());
        bob.nickname = "robert".to_string();
        assert!(!store.insert_or_update_friend(&bob).unwrap());

        let friends = store.get_friends().unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].nickname, "robert");
    }

    #[test]
    fn test_delete_friend() {
        let store = temp_store("delete");
        let bob = friend("bob");
        store.insert_or_update_friend(&bob).unwrap();

        store.delete_friend(&bob.id).unwrap();
        assert!(matches!(
            store.get_friend_by_id(&bob.id),
            Err(Error::FriendNotFound(_))
        ));
        assert!(matches!(
            store.delete_friend(&bob.id),
            Err(Error::FriendNotFound(_))
        ));
    }

    #[test]
    fn test_reads_see_other_writers() {
        let first = temp_store("shared");
        let second = JsonStore::open(first.dir().to_path_buf()).unwrap();
        let bob = friend("bob");

        first.insert_or_update_friend(&bob).unwrap();
        assert_eq!(second.get_friend_by_id(&bob.id).unwrap(), bob);
    }

    #[test]
    fn test_memory_store_matches_json_store() {
        let store = MemoryStore::new();
        assert!(matches!(store.get_self(), Err(Error::SelfNotFound)));

        let bob = friend("bob");
        assert!(store.insert_or_update_friend(&bob).unwrap());
        assert!(!store.insert_or_update_friend(&bob).unwrap());
        store.delete_friend(&bob.id).unwrap();
        assert!(matches!(
            store.delete_friend(&bob.id),
            Err(Error::FriendNotFound(_))
        ));
    }
}
