//! Credential generation
//!
//! Producing a complete local identity: TLS key material plus a
//! hidden-service key pair whose onion address becomes the public address.

use super::{HiddenServiceKeys, KeyMaterial};
use crate::data::Identity;
use anyhow::{bail, Result};

/// Generates a complete local identity
pub trait CredentialGenerator: Send + Sync {
    fn generate(&self, nickname: &str) -> Result<Identity>;
}

/// Generates all key material in-process
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCredentialGenerator;

impl CredentialGenerator for LocalCredentialGenerator {
    fn generate(&self, nickname: &str) -> Result<Identity> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            bail!("nickname cannot be empty");
        }

        let tls = KeyMaterial::generate(nickname)?;
        let hidden_service = HiddenServiceKeys::generate();

        Ok(Identity {
            nickname: nickname.to_string(),
            certificate: tls.certificate,
            private_key: tls.private_key,
            hidden_service_address: hidden_service.onion_address(),
            hidden_service_private_key: hidden_service.encode(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_is_consistent() {
        let identity = LocalCredentialGenerator.generate("  alice ").unwrap();
        assert_eq!(identity.nickname, "alice");

        let keys = identity.hidden_service_keys().unwrap();
        assert_eq!(keys.onion_address(), identity.hidden_service_address);
        assert!(identity.key_material().certificate_chain().is_ok());
    }

    #[test]
    fn test_empty_nickname_rejected() {
        assert!(LocalCredentialGenerator.generate("   ").is_err());
    }
}
