//! Utility functions
//!
//! Pure helpers.

pub mod time;
