//! Whereabouts library crate
//!
//! Friend-to-friend status sharing with no central server. Each user runs a
//! Tor hidden service serving their current status over mutual TLS, and
//! polls every friend's hidden service on a fixed period.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface (init, export, friend, run)
//! - [`config`] - Configuration loading, validation and preferences
//! - [`crypto`] - Hidden-service keys and X.509 credentials
//! - [`data`] - Identity, friends and status persistence
//! - [`engine`] - Top-level start/stop orchestration
//! - [`events`] - Broadcast event bus
//! - [`location`] - Local status source
//! - [`poller`] - Periodic friend status polling
//! - [`scheduler`] - Restartable delayed task execution
//! - [`sharing`] - Status server published as a hidden service
//! - [`tor`] - Tor control port client
//! - [`util`] - Time helpers

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::significant_drop_tightening)] // Lock scope is intentional
#![allow(clippy::new_without_default)]
#![allow(clippy::single_match_else)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::cast_possible_truncation)]

pub mod cli;
pub mod client;
pub mod config;
pub mod crypto;
pub mod data;
pub mod engine;
pub mod error;
pub mod events;
pub mod location;
pub mod logging;
pub mod poller;
pub mod protocol;
pub mod scheduler;
pub mod sharing;
pub mod tls;
pub mod tor;
pub mod util;

pub use engine::{Engine, EngineHealth, EngineParts};
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
