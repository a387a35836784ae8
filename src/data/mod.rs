//! Identity, friend and status records and their persistence

pub mod model;
pub mod store;

pub use model::{Friend, Identity, PublicIdentity, Status};
pub use store::{JsonStore, MemoryStore, Store};
