//! Tor daemon interaction
//!
//! Control-port client and the hidden service it hosts. Tor itself is
//! treated as a black box.

pub mod control;
pub mod hidden_service;

pub use control::TorController;
pub use hidden_service::TorHiddenService;
