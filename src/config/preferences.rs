//! Typed preferences
//!
//! Every key must have a registered default before it can be read; reading
//! an unregistered key is a packaging defect and fails with
//! `ConfigDefaultMissing`. Each change of an effective value is broadcast
//! by key name to subscribers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Delay between polls of one friend, in milliseconds
pub const FRIEND_POLL_PERIOD_MS: &str = "friend_poll_period_ms";
/// Whether the local status is published to friends
pub const LOCATION_SHARING_ENABLED: &str = "location_sharing_enabled";

const DEFAULT_FRIEND_POLL_PERIOD_MS: i64 = 60_000;
const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// A boolean or integer preference value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    Bool(bool),
    Int(i64),
}

impl PreferenceValue {
    fn type_name(self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
        }
    }

    fn same_type(self, other: Self) -> bool {
        self.type_name() == other.type_name()
    }
}

#[derive(Default)]
struct Values {
    defaults: HashMap<String, PreferenceValue>,
    overrides: HashMap<String, PreferenceValue>,
}

impl Values {
    fn effective(&self, key: &str) -> Option<PreferenceValue> {
        self.overrides
            .get(key)
            .or_else(|| self.defaults.get(key))
            .copied()
    }

    fn check(&self, key: &str, value: PreferenceValue) -> Result<()> {
        let default = self
            .defaults
            .get(key)
            .ok_or_else(|| Error::ConfigDefaultMissing(key.to_string()))?;
        if !default.same_type(value) {
            return Err(type_error(key, default.type_name()));
        }
        Ok(())
    }
}

/// Shared preference store
#[derive(Clone)]
pub struct Preferences {
    values: Arc<RwLock<Values>>,
    changes: broadcast::Sender<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self::new()
    }
}

impl Preferences {
    /// Empty store with no registered defaults
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Arc::new(RwLock::new(Values::default())),
            changes,
        }
    }

    /// Store with every built-in key registered
    pub fn with_defaults() -> Self {
        let prefs = Self::new();
        prefs.register_default(
            FRIEND_POLL_PERIOD_MS,
            PreferenceValue::Int(DEFAULT_FRIEND_POLL_PERIOD_MS),
        );
        prefs.register_default(LOCATION_SHARING_ENABLED, PreferenceValue::Bool(true));
        prefs
    }

    pub fn register_default(&self, key: &str, value: PreferenceValue) {
        self.write().defaults.insert(key.to_string(), value);
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key, PreferenceValue::Bool(false))? {
            PreferenceValue::Bool(value) => Ok(value),
            PreferenceValue::Int(_) => Err(type_error(key, "boolean")),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.get(key, PreferenceValue::Int(0))? {
            PreferenceValue::Int(value) => Ok(value),
            PreferenceValue::Bool(_) => Err(type_error(key, "integer")),
        }
    }

    fn get(&self, key: &str, probe: PreferenceValue) -> Result<PreferenceValue> {
        let values = self.read();
        values.check(key, probe)?;
        values
            .effective(key)
            .ok_or_else(|| Error::ConfigDefaultMissing(key.to_string()))
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<bool> {
        self.set(key, PreferenceValue::Bool(value))
    }

    pub fn set_int(&self, key: &str, value: i64) -> Result<bool> {
        self.set(key, PreferenceValue::Int(value))
    }

    /// Override `key`. Returns true if the effective value changed.
    pub fn set(&self, key: &str, value: PreferenceValue) -> Result<bool> {
        let changed = {
            let mut values = self.write();
            values.check(key, value)?;
            let before = values.effective(key);
            values.overrides.insert(key.to_string(), value);
            before != Some(value)
        };
        if changed {
            self.notify(key);
        }
        Ok(changed)
    }

    /// Replace all overrides with `overrides`; keys not present revert to
    /// their defaults. Returns the number of effective values that changed.
    pub fn apply(&self, overrides: &BTreeMap<String, PreferenceValue>) -> Result<usize> {
        let changed: Vec<String> = {
            let mut values = self.write();
            for (key, value) in overrides {
                values.check(key, *value)?;
            }

            let keys: Vec<String> = values.defaults.keys().cloned().collect();
            let before: Vec<_> = keys.iter().map(|k| values.effective(k)).collect();
            values.overrides = overrides
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            keys.into_iter()
                .zip(before)
                .filter(|(key, old)| values.effective(key) != *old)
                .map(|(key, _)| key)
                .collect()
        };

        for key in &changed {
            self.notify(key);
        }
        if !changed.is_empty() {
            info!(changed = ?changed, "Preferences updated");
        }
        Ok(changed.len())
    }

    /// Receive the key of every preference whose effective value changes
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    fn notify(&self, key: &str) {
        debug!(key, "Preference changed");
        let _ = self.changes.send(key.to_string());
    }

    fn read(&self) -> RwLockReadGuard<'_, Values> {
        self.values
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Values> {
        self.values
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn type_error(key: &str, expected: &'static str) -> Error {
    Error::PreferenceType {
        key: key.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_defaults() {
        let prefs = Preferences::with_defaults();
        assert_eq!(prefs.get_int(FRIEND_POLL_PERIOD_MS).unwrap(), 60_000);
        assert!(prefs.get_bool(LOCATION_SHARING_ENABLED).unwrap());
    }

    #[test]
    fn test_missing_default_fails() {
        let prefs = Preferences::new();
        assert!(matches!(
            prefs.get_int(FRIEND_POLL_PERIOD_MS),
            Err(Error::ConfigDefaultMissing(key)) if key == FRIEND_POLL_PERIOD_MS
        ));
        assert!(matches!(
            prefs.get_bool("anything"),
            Err(Error::ConfigDefaultMissing(_))
        ));
        assert!(matches!(
            prefs.set_bool("anything", true),
            Err(Error::ConfigDefaultMissing(_))
        ));
    }

    #[test]
    fn test_wrong_accessor_fails() {
        let prefs = Preferences::with_defaults();
        assert!(matches!(
            prefs.get_bool(FRIEND_POLL_PERIOD_MS),
            Err(Error::PreferenceType { expected: "integer", .. })
        ));
        assert!(matches!(
            prefs.set_int(LOCATION_SHARING_ENABLED, 1),
            Err(Error::PreferenceType { expected: "boolean", .. })
        ));
    }

    #[test]
    fn test_set_reports_only_real_changes() {
        let prefs = Preferences::with_defaults();
        let mut changes = prefs.subscribe();

        assert!(!prefs.set_int(FRIEND_POLL_PERIOD_MS, 60_000).unwrap());
        assert!(prefs.set_int(FRIEND_POLL_PERIOD_MS, 5_000).unwrap());
        assert_eq!(prefs.get_int(FRIEND_POLL_PERIOD_MS).unwrap(), 5_000);

        assert_eq!(changes.try_recv().unwrap(), FRIEND_POLL_PERIOD_MS);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_apply_replaces_overrides() {
        let prefs = Preferences::with_defaults();
        prefs.set_bool(LOCATION_SHARING_ENABLED, false).unwrap();

        let mut overrides = BTreeMap::new();
        overrides.insert(FRIEND_POLL_PERIOD_MS.to_string(), PreferenceValue::Int(1_000));
        assert_eq!(prefs.apply(&overrides).unwrap(), 2);

        assert_eq!(prefs.get_int(FRIEND_POLL_PERIOD_MS).unwrap(), 1_000);
        assert!(prefs.get_bool(LOCATION_SHARING_ENABLED).unwrap());
        assert_eq!(prefs.apply(&overrides).unwrap(), 0);
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let prefs = Preferences::with_defaults();
        let mut overrides = BTreeMap::new();
        overrides.insert(FRIEND_POLL_PERIOD_MS.to_string(), PreferenceValue::Int(1_000));
        overrides.insert("bogus".to_string(), PreferenceValue::Int(1));

        assert!(prefs.apply(&overrides).is_err());
        assert_eq!(prefs.get_int(FRIEND_POLL_PERIOD_MS).unwrap(), 60_000);
    }

    #[test]
    fn test_toml_values_deserialize() {
        let parsed: BTreeMap<String, PreferenceValue> =
            toml::from_str("friend_poll_period_ms = 30000\nlocation_sharing_enabled = false")
                .unwrap();
        assert_eq!(parsed[FRIEND_POLL_PERIOD_MS], PreferenceValue::Int(30_000));
        assert_eq!(parsed[LOCATION_SHARING_ENABLED], PreferenceValue::Bool(false));
    }
}
