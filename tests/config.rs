//! Configuration file loading

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use whereabouts::config::{
    load_config, load_from_path, PreferenceValue, Preferences, FRIEND_POLL_PERIOD_MS,
    LOCATION_SHARING_ENABLED,
};

fn write_config(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "whereabouts-config-{}-{}.toml",
        name,
        std::process::id()
    ));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_full_config() {
    let path = write_config(
        "full",
        r#"
[tor]
control_host = "10.0.0.2"
control_port = 9151
control_password = "hunter2"
socks_port = 9150
bootstrap_timeout_secs = 30

[data]
dir = "/tmp/whereabouts-data"

[sharing]
bind_address = "0.0.0.0"
port = 8443

[client]
connect_timeout_secs = 20
request_timeout_secs = 40

[preferences]
friend_poll_period_ms = 30000
location_sharing_enabled = false

[location]
latitude = 59.33
longitude = 18.06
street_address = "Gamla stan"
"#,
    );

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.tor.control_addr(), "10.0.0.2:9151");
    assert_eq!(config.tor.control_password.as_deref(), Some("hunter2"));
    assert_eq!(config.tor.socks_port, 9150);
    assert_eq!(config.tor.bootstrap_timeout(), Duration::from_secs(30));
    assert_eq!(config.data.dir, PathBuf::from("/tmp/whereabouts-data"));
    assert_eq!(config.sharing.bind_address, "0.0.0.0".parse::<IpAddr>().unwrap());
    assert_eq!(config.sharing.port, 8443);
    assert_eq!(config.client.request_timeout(), Duration::from_secs(40));

    let location = config.location.as_ref().unwrap();
    assert_eq!(location.precision, 100);
    assert_eq!(location.street_address, "Gamla stan");

    let preferences = Preferences::with_defaults();
    assert_eq!(preferences.apply(&config.preferences).unwrap(), 2);
    assert_eq!(preferences.get_int(FRIEND_POLL_PERIOD_MS).unwrap(), 30_000);
    assert!(!preferences.get_bool(LOCATION_SHARING_ENABLED).unwrap());

    let _ = std::fs::remove_file(path);
}

#[test]
fn test_empty_file_uses_defaults() {
    let path = write_config("empty", "");
    let config = load_config(Some(&path)).unwrap();

    assert_eq!(config.tor.control_addr(), "127.0.0.1:9051");
    assert!(config.tor.control_password.is_none());
    assert_eq!(config.sharing.port, 0);
    assert!(config.preferences.is_empty());
    assert!(config.location.is_none());

    let _ = std::fs::remove_file(path);
}

#[test]
fn test_preference_values_keep_their_type() {
    let path = write_config(
        "typed",
        "[preferences]\nfriend_poll_period_ms = 5000\nlocation_sharing_enabled = true\n",
    );
    let config = load_from_path(&path).unwrap();

    assert_eq!(
        config.preferences.get(FRIEND_POLL_PERIOD_MS),
        Some(&PreferenceValue::Int(5000))
    );
    assert_eq!(
        config.preferences.get(LOCATION_SHARING_ENABLED),
        Some(&PreferenceValue::Bool(true))
    );

    let _ = std::fs::remove_file(path);
}

#[test]
fn test_invalid_files_are_rejected() {
    let cases = [
        ("unknown-pref", "[preferences]\nsomething_else = 1\n"),
        ("wrong-type", "[preferences]\nlocation_sharing_enabled = 3\n"),
        ("zero-period", "[preferences]\nfriend_poll_period_ms = 0\n"),
        ("timeouts", "[client]\nconnect_timeout_secs = 30\nrequest_timeout_secs = 10\n"),
        ("latitude", "[location]\nlatitude = 123.0\nlongitude = 0.0\n"),
        ("syntax", "[tor\ncontrol_port = 1\n"),
    ];

    for (name, contents) in cases {
        let path = write_config(name, contents);
        assert!(load_from_path(&path).is_err(), "{} should be rejected", name);
        let _ = std::fs::remove_file(path);
    }
}

#[test]
fn test_missing_explicit_path_is_an_error() {
    let path = std::env::temp_dir().join("whereabouts-config-does-not-exist.toml");
    assert!(load_config(Some(&path)).is_err());
}
