//! X.509 key material
//!
//! Self-signed certificates are the only trust anchor: peers pin each
//! other's certificates directly, so no CA chain is ever built.

use anyhow::{bail, Context, Result};
use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// PEM certificate and private key presented as a TLS credential
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub certificate: String,
    pub private_key: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("certificate", &self.certificate)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl KeyMaterial {
    pub fn new(certificate: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }

    /// Generate a self-signed ECDSA P-256 certificate with `common_name` as subject
    pub fn generate(common_name: &str) -> Result<Self> {
        let key_pair = KeyPair::generate().context("Failed to generate TLS key pair")?;

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);

        let cert = params
            .self_signed(&key_pair)
            .context("Failed to self-sign certificate")?;

        Ok(Self {
            certificate: cert.pem(),
            private_key: key_pair.serialize_pem(),
        })
    }

    /// Certificate chain (a single self-signed certificate) in DER form
    pub fn certificate_chain(&self) -> Result<Vec<CertificateDer<'static>>> {
        Ok(vec![parse_certificate(&self.certificate)?])
    }

    /// Private key in DER form
    pub fn private_key_der(&self) -> Result<PrivateKeyDer<'static>> {
        parse_private_key(&self.private_key)
    }
}

/// Parse the first certificate in a PEM document
pub fn parse_certificate(pem: &str) -> Result<CertificateDer<'static>> {
    let mut reader = pem.as_bytes();
    let first = rustls_pemfile::certs(&mut reader).next();
    match first {
        Some(cert) => cert.context("Malformed PEM certificate"),
        None => bail!("No certificate found in PEM data"),
    }
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM document
pub fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::private_key(&mut reader)
        .context("Malformed PEM private key")?
        .context("No private key found in PEM data")
}

/// Lowercase hex SHA-256 of the certificate's DER encoding
pub fn fingerprint(pem: &str) -> Result<String> {
    let der = parse_certificate(pem)?;
    Ok(fingerprint_der(&der))
}

/// Lowercase hex SHA-256 of a DER certificate
pub fn fingerprint_der(der: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(der.as_ref());
    data_encoding::HEXLOWER.encode(&digest)
}
