//! Mutual TLS configuration
//!
//! Peers trust each other by certificate pinning, never through a CA:
//! the server accepts exactly the certificates on its friend allowlist and
//! a client accepts exactly the one certificate it expects from the friend
//! it is calling. Handshake signatures are still checked with the ring
//! provider's algorithms, so a peer must hold the pinned key.

use crate::crypto::{fingerprint_der, KeyMaterial};
use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, DistinguishedName, ServerConfig,
    SignatureScheme,
};
use std::sync::Arc;
use tracing::debug;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Server config presenting `credentials` and requiring a client
/// certificate from `friend_certificates`
pub fn server_config(
    credentials: &KeyMaterial,
    friend_certificates: &[String],
) -> Result<ServerConfig> {
    let allowlist = friend_certificates
        .iter()
        .map(|pem| crate::crypto::x509::parse_certificate(pem))
        .collect::<Result<Vec<_>>>()
        .context("Invalid friend certificate")?;
    let provider = provider();
    let verifier = FriendAllowlistVerifier::new(allowlist, Arc::clone(&provider));

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(credentials.certificate_chain()?, credentials.private_key_der()?)
        .context("Invalid server credentials")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Client config presenting `credentials` and accepting only `server_certificate`
pub fn client_config(credentials: &KeyMaterial, server_certificate: &str) -> Result<ClientConfig> {
    let pinned = crate::crypto::x509::parse_certificate(server_certificate)
        .context("Invalid server certificate")?;
    let provider = provider();
    let verifier = PinnedServerVerifier::new(pinned, Arc::clone(&provider));

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(credentials.certificate_chain()?, credentials.private_key_der()?)
        .context("Invalid client credentials")?;
    Ok(config)
}

/// Accepts client certificates that exactly match one on the allowlist
#[derive(Debug)]
pub struct FriendAllowlistVerifier {
    allowlist: Vec<CertificateDer<'static>>,
    provider: Arc<CryptoProvider>,
}

impl FriendAllowlistVerifier {
    pub fn new(allowlist: Vec<CertificateDer<'static>>, provider: Arc<CryptoProvider>) -> Self {
        Self {
            allowlist,
            provider,
        }
    }
}

impl ClientCertVerifier for FriendAllowlistVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        if self
            .allowlist
            .iter()
            .any(|cert| cert.as_ref() == end_entity.as_ref())
        {
            Ok(ClientCertVerified::assertion())
        } else {
            debug!(
                fingerprint = %fingerprint_der(end_entity),
                "Rejected client certificate not on friend allowlist"
            );
            Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts exactly one server certificate, whatever name it was reached by
#[derive(Debug)]
pub struct PinnedServerVerifier {
    pinned: CertificateDer<'static>,
    provider: Arc<CryptoProvider>,
}

impl PinnedServerVerifier {
    pub fn new(pinned: CertificateDer<'static>, provider: Arc<CryptoProvider>) -> Self {
        Self { pinned, provider }
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            debug!(
                expected = %fingerprint_der(&self.pinned),
                presented = %fingerprint_der(end_entity),
                "Server certificate does not match pinned certificate"
            );
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
