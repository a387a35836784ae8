//! Configuration loading and validation
//!
//! Daemon settings come from a TOML file and are immutable once loaded;
//! a SIGHUP reload builds a new `Config`. Runtime-tunable values live in
//! [`Preferences`], which carries registered defaults plus overrides.

pub mod file;
pub mod preferences;
mod validation;

pub use file::{load_config, load_from_path};
pub use preferences::{PreferenceValue, Preferences, FRIEND_POLL_PERIOD_MS, LOCATION_SHARING_ENABLED};
pub use validation::validate;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tor: TorConfig,
    pub data: DataConfig,
    pub sharing: SharingConfig,
    pub client: ClientConfig,
    /// Preference overrides, keyed by preference name
    pub preferences: BTreeMap<String, PreferenceValue>,
    /// Fixed position published as the local status
    pub location: Option<LocationConfig>,
}

/// Tor daemon connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    pub control_host: String,
    pub control_port: u16,
    /// Cookie authentication is used when unset
    pub control_password: Option<String>,
    /// Used when Tor does not report its SOCKS listener
    pub socks_port: u16,
    pub bootstrap_timeout_secs: u64,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            control_host: "127.0.0.1".to_string(),
            control_port: 9051,
            control_password: None,
            socks_port: 9050,
            bootstrap_timeout_secs: 120,
        }
    }
}

impl TorConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.control_host, self.control_port)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }
}

/// Identity and friend records
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/whereabouts"),
        }
    }
}

/// Local TLS server behind the hidden service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub bind_address: IpAddr,
    /// 0 picks an ephemeral port
    pub port: u16,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: 0,
        }
    }
}

/// Outbound status requests
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            request_timeout_secs: 120,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Fixed position reported in place of a location sensor
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in metres
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default)]
    pub street_address: String,
}

fn default_precision() -> u32 {
    100
}
