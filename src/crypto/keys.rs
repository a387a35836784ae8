//! Ed25519 key management for v3 hidden services

use anyhow::{bail, Context, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha512};
use sha3::Sha3_256;

/// Hidden-service key pair
#[derive(Clone)]
pub struct HiddenServiceKeys {
    seed: [u8; 32],
    verifying_key: VerifyingKey,
}

impl HiddenServiceKeys {
    /// Create from raw seed bytes (32 bytes)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            seed: *seed,
            verifying_key: signing_key.verifying_key(),
        }
    }

    /// Generate a fresh key pair from the OS RNG
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_seed(&signing_key.to_bytes())
    }

    /// Decode the base64 seed stored in an identity record
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let bytes = data_encoding::BASE64
            .decode(encoded.trim().as_bytes())
            .context("Hidden service private key is not valid base64")?;
        let seed: [u8; 32] = match bytes.try_into() {
            Ok(seed) => seed,
            Err(bytes) => bail!(
                "Invalid hidden service key size: {} bytes (expected 32)",
                bytes.len()
            ),
        };
        Ok(Self::from_seed(&seed))
    }

    /// Base64 seed for storage in an identity record
    pub fn encode(&self) -> String {
        data_encoding::BASE64.encode(&self.seed)
    }

    /// Get raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Expanded 64-byte secret key in the form Tor's `ADD_ONION ED25519-V3` expects:
    /// clamped scalar followed by the PRF secret
    pub fn expanded_secret_key(&self) -> [u8; 64] {
        let mut hasher = Sha512::new();
        hasher.update(self.seed);
        let digest = hasher.finalize();

        let mut expanded = [0u8; 64];
        expanded.copy_from_slice(&digest);
        // Ed25519 clamping
        expanded[0] &= 248;
        expanded[31] &= 63;
        expanded[31] |= 64;
        expanded
    }

    /// Derive the v3 onion address from public key
    pub fn onion_address(&self) -> String {
        // v3 address = base32(pubkey || checksum || version)
        let pubkey = self.public_key_bytes();

        let mut addr_bytes = [0u8; 35];
        addr_bytes[..32].copy_from_slice(&pubkey);
        addr_bytes[32..34].copy_from_slice(&onion_checksum(&pubkey));
        addr_bytes[34] = 0x03;

        let encoded = data_encoding::BASE32_NOPAD.encode(&addr_bytes);
        format!("{}.onion", encoded.to_lowercase())
    }
}

/// Checksum = H(".onion checksum" || pubkey || version)[:2]
fn onion_checksum(pubkey: &[u8]) -> [u8; 2] {
    let mut hasher = Sha3_256::new();
    hasher.update(b".onion checksum");
    hasher.update(pubkey);
    hasher.update([0x03]);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

/// Strip the `.onion` suffix and lowercase
pub fn service_id(onion_addr: &str) -> String {
    onion_addr
        .trim()
        .to_lowercase()
        .trim_end_matches(".onion")
        .to_string()
}

/// Extract the ed25519 public key from a v3 onion address
///
/// A v3 .onion address is: base32(pubkey || checksum || version)
/// - pubkey: 32 bytes
/// - checksum: 2 bytes (H(".onion checksum" || pubkey || version)[:2])
/// - version: 1 byte (0x03)
pub fn pubkey_from_onion_address(onion_addr: &str) -> Result<VerifyingKey> {
    let addr = service_id(onion_addr).to_uppercase();

    // v3 addresses are 56 base32 characters
    if addr.len() != 56 {
        bail!(
            "Invalid v3 onion address length: {} (expected 56)",
            addr.len()
        );
    }

    let decoded = data_encoding::BASE32_NOPAD
        .decode(addr.as_bytes())
        .with_context(|| format!("Failed to base32 decode onion address: {}", addr))?;

    if decoded.len() != 35 {
        bail!("Decoded address has wrong size: {} bytes", decoded.len());
    }

    let pubkey_bytes = &decoded[..32];
    let checksum = &decoded[32..34];
    let version = decoded[34];

    if version != 0x03 {
        bail!("Invalid onion address version: {} (expected 3)", version);
    }

    if onion_checksum(pubkey_bytes).as_slice() != checksum {
        bail!("Onion address checksum mismatch");
    }

    let mut key_array = [0u8; 32];
    key_array.copy_from_slice(pubkey_bytes);
    VerifyingKey::from_bytes(&key_array).context("Invalid ed25519 public key in onion address")
}
