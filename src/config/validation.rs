//! Configuration validation
//!
//! Fail-fast validation of configuration invariants.

use super::{Config, PreferenceValue, Preferences};
use anyhow::{bail, Result};

/// Validate configuration invariants
pub fn validate(config: &Config) -> Result<()> {
    validate_tor(config)?;
    validate_data(config)?;
    validate_client(config)?;
    validate_preferences(config)?;
    validate_location(config)?;
    Ok(())
}

fn validate_tor(config: &Config) -> Result<()> {
    if config.tor.control_host.is_empty() {
        bail!("tor.control_host cannot be empty");
    }
    if config.tor.control_port == 0 {
        bail!("tor.control_port cannot be 0");
    }
    if config.tor.socks_port == 0 {
        bail!("tor.socks_port cannot be 0");
    }
    if config.tor.bootstrap_timeout_secs == 0 {
        bail!("tor.bootstrap_timeout_secs must be greater than 0");
    }
    Ok(())
}

fn validate_data(config: &Config) -> Result<()> {
    if config.data.dir.as_os_str().is_empty() {
        bail!("data.dir cannot be empty");
    }
    Ok(())
}

fn validate_client(config: &Config) -> Result<()> {
    if config.client.connect_timeout_secs == 0 {
        bail!("client.connect_timeout_secs must be greater than 0");
    }
    if config.client.request_timeout_secs < config.client.connect_timeout_secs {
        bail!(
            "client.request_timeout_secs ({}) must be >= connect_timeout_secs ({})",
            config.client.request_timeout_secs,
            config.client.connect_timeout_secs
        );
    }
    Ok(())
}

fn validate_preferences(config: &Config) -> Result<()> {
    // Overrides must name a registered key and match its type
    let defaults = Preferences::with_defaults();
    for (key, value) in &config.preferences {
        let matches = match value {
            PreferenceValue::Bool(_) => defaults.get_bool(key).map(|_| ()),
            PreferenceValue::Int(_) => defaults.get_int(key).map(|_| ()),
        };
        if let Err(e) = matches {
            bail!("preferences.{}: {}", key, e);
        }
    }

    if let Some(PreferenceValue::Int(period)) = config.preferences.get(super::FRIEND_POLL_PERIOD_MS) {
        if *period <= 0 {
            bail!("preferences.{} must be positive", super::FRIEND_POLL_PERIOD_MS);
        }
    }
    Ok(())
}

fn validate_location(config: &Config) -> Result<()> {
    if let Some(location) = &config.location {
        if !(-90.0..=90.0).contains(&location.latitude) {
            bail!("location.latitude must be within [-90, 90]");
        }
        if !(-180.0..=180.0).contains(&location.longitude) {
            bail!("location.longitude must be within [-180, 180]");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocationConfig;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_unknown_preference() {
        let mut config = Config::default();
        config
            .preferences
            .insert("no_such_key".to_string(), PreferenceValue::Bool(true));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_mistyped_preference() {
        let mut config = Config::default();
        config.preferences.insert(
            crate::config::FRIEND_POLL_PERIOD_MS.to_string(),
            PreferenceValue::Bool(true),
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_non_positive_period() {
        let mut config = Config::default();
        config.preferences.insert(
            crate::config::FRIEND_POLL_PERIOD_MS.to_string(),
            PreferenceValue::Int(0),
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_location() {
        let mut config = Config::default();
        config.location = Some(LocationConfig {
            latitude: 91.0,
            longitude: 0.0,
            precision: 10,
            street_address: String::new(),
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_request_timeout_below_connect_timeout() {
        let mut config = Config::default();
        config.client.connect_timeout_secs = 30;
        config.client.request_timeout_secs = 10;
        assert!(validate(&config).is_err());
    }
}
