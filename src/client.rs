//! Outbound status requests
//!
//! A GET over mutual TLS, routed through Tor's SOCKS proxy with remote DNS
//! resolution (`socks5h`) so `.onion` names reach Tor unresolved. The
//! server must present exactly the certificate we hold for that friend.

use crate::config::ClientConfig;
use crate::crypto::KeyMaterial;
use crate::tls;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// One status request
pub struct StatusRequest<'a> {
    /// Certificate and key presented to the server
    pub client_credentials: &'a KeyMaterial,
    /// The only certificate the server may present
    pub server_certificate: &'a str,
    pub socks_proxy_port: u16,
    /// `host` or `host:port`
    pub address: &'a str,
    pub path: &'a str,
}

/// Performs status requests
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    /// Returns the response body of a successful (2xx) response
    async fn get(&self, request: StatusRequest<'_>) -> Result<String>;
}

/// How the client reaches the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Through Tor's SOCKS port
    TorSocks,
    /// Straight to the address, ignoring the SOCKS port
    Direct,
}

/// reqwest-based [`StatusFetcher`]
#[derive(Debug, Clone)]
pub struct WebClient {
    mode: ProxyMode,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl WebClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_mode(config, ProxyMode::TorSocks)
    }

    pub fn with_mode(config: &ClientConfig, mode: ProxyMode) -> Self {
        Self {
            mode,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    // Per-request client: the pinned certificate differs per friend
    fn build_client(&self, request: &StatusRequest<'_>) -> Result<reqwest::Client> {
        let tls = tls::client_config(request.client_credentials, request.server_certificate)?;

        let mut builder = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);

        builder = match self.mode {
            ProxyMode::TorSocks => {
                let socks_url = format!("socks5h://127.0.0.1:{}", request.socks_proxy_port);
                builder.proxy(
                    reqwest::Proxy::all(&socks_url).context("Failed to configure SOCKS proxy")?,
                )
            },
            ProxyMode::Direct => builder.no_proxy(),
        };

        builder.build().context("Failed to build HTTP client")
    }
}

#[async_trait]
impl StatusFetcher for WebClient {
    async fn get(&self, request: StatusRequest<'_>) -> Result<String> {
        let client = self.build_client(&request)?;
        let url = format!("https://{}{}", request.address, request.path);
        debug!("GET {}", url);

        let response = client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Request to {} was refused", url))?;

        response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", url))
    }
}
