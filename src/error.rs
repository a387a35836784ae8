//! Error taxonomy
//!
//! Structural problems (missing preference defaults, a sharing service that
//! cannot bind) propagate to the caller of the orchestration method.
//! Conditions that are expected while running (a friend deleted mid-poll,
//! transient network failure) are absorbed by the poller and only logged.

use thiserror::Error;

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum Error {
    /// A preference was read for which no default was ever registered.
    /// This is a packaging defect, never retried.
    #[error("no default registered for preference '{0}'")]
    ConfigDefaultMissing(String),

    /// A preference was read with the wrong accessor
    #[error("preference '{key}' is not a {expected} preference")]
    PreferenceType { key: String, expected: &'static str },

    /// TLS server or hidden service failed to start
    #[error("failed to start sharing service: {0:#}")]
    ServiceStart(anyhow::Error),

    /// A port or proxy was queried while the owning component is stopped
    #[error("{0} is not running")]
    NotRunning(&'static str),

    /// Friend lookup by id found nothing
    #[error("friend {0} not found")]
    FriendNotFound(String),

    /// No local identity has been generated yet
    #[error("no local identity has been generated")]
    SelfNotFound,

    /// Friend record rejected on add
    #[error("invalid friend: {0}")]
    InvalidFriend(String),

    /// Network, TLS or decode failure during a status request
    #[error("status request failed: {0:#}")]
    Request(anyhow::Error),

    /// Persistence failure
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    /// Scheduler started outside a tokio runtime
    #[error("scheduler requires a running tokio runtime")]
    NoRuntime,
}

/// Crate-wide result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_include_context() {
        let err = Error::ServiceStart(anyhow::anyhow!("bind failed").context("web server"));
        assert_eq!(
            err.to_string(),
            "failed to start sharing service: web server: bind failed"
        );
    }
}
