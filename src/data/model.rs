//! Data model

use crate::crypto::{self, HiddenServiceKeys, KeyMaterial};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// The local identity: TLS credential plus hidden-service key pair
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub nickname: String,
    /// PEM certificate
    pub certificate: String,
    /// PEM private key
    pub private_key: String,
    /// v3 onion address, with `.onion` suffix
    pub hidden_service_address: String,
    /// Base64 Ed25519 seed
    pub hidden_service_private_key: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("nickname", &self.nickname)
            .field("hidden_service_address", &self.hidden_service_address)
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// TLS credential presented to friends
    pub fn key_material(&self) -> KeyMaterial {
        KeyMaterial::new(&self.certificate, &self.private_key)
    }

    pub fn hidden_service_keys(&self) -> anyhow::Result<HiddenServiceKeys> {
        HiddenServiceKeys::from_encoded(&self.hidden_service_private_key)
    }

    /// The part of the identity handed to friends
    pub fn public_identity(&self) -> PublicIdentity {
        PublicIdentity {
            nickname: self.nickname.clone(),
            certificate: self.certificate.clone(),
            hidden_service_address: self.hidden_service_address.clone(),
        }
    }
}

/// What a peer shares about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub nickname: String,
    pub certificate: String,
    pub hidden_service_address: String,
}

/// A trusted peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    /// SHA-256 fingerprint of the friend's certificate
    pub id: String,
    pub nickname: String,
    pub certificate: String,
    pub hidden_service_address: String,
}

impl Friend {
    /// Validate a public identity and derive its stable id
    pub fn from_public_identity(public: PublicIdentity) -> Result<Self> {
        let id = crypto::fingerprint(&public.certificate)
            .map_err(|e| Error::InvalidFriend(format!("bad certificate: {:#}", e)))?;
        crypto::pubkey_from_onion_address(&public.hidden_service_address)
            .map_err(|e| Error::InvalidFriend(format!("bad hidden service address: {:#}", e)))?;
        if public.nickname.trim().is_empty() {
            return Err(Error::InvalidFriend("nickname cannot be empty".to_string()));
        }

        Ok(Self {
            id,
            nickname: public.nickname,
            certificate: public.certificate,
            hidden_service_address: public.hidden_service_address,
        })
    }

    /// True if this record describes `identity` itself
    pub fn is_identity(&self, identity: &Identity) -> bool {
        crypto::service_id(&self.hidden_service_address)
            == crypto::service_id(&identity.hidden_service_address)
            || crypto::fingerprint(&identity.certificate).is_ok_and(|id| id == self.id)
    }
}

/// A friend-supplied location/state update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Unix timestamp of the fix
    pub timestamp: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in metres
    pub precision: u32,
    #[serde(default)]
    pub street_address: String,
}
