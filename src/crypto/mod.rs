//! Identity and trust material
//!
//! Ed25519 hidden-service keys, X.509 TLS credentials, and the
//! generator that produces both for a new local identity.
//! All crypto operations are isolated here - no network IO.

pub mod generate;
pub mod keys;
pub mod x509;

pub use generate::{CredentialGenerator, LocalCredentialGenerator};
pub use keys::{pubkey_from_onion_address, service_id, HiddenServiceKeys};
pub use x509::{fingerprint, fingerprint_der, KeyMaterial};
