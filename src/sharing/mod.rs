//! Sharing service
//!
//! Makes the local peer reachable: a mutual-TLS status server on a local
//! port, exposed to the Tor network as a hidden service. Both halves start
//! and stop together; any change to the identity or the friend allowlist
//! means a full stop and start.
//!
//! The ports of the running service are published on a watch channel so
//! readers never wait on a start in progress.

mod server;

pub use server::WebServer;

use crate::crypto::HiddenServiceKeys;
use crate::data::Identity;
use crate::error::{Error, Result};
use crate::location::StatusBoard;
use anyhow::Context;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What the hidden-service process is asked to serve
pub struct HiddenServiceConfig {
    pub keys: HiddenServiceKeys,
    /// Local address inbound hidden-service connections are forwarded to
    pub forward_addr: SocketAddr,
}

/// The process hosting the hidden service
#[async_trait]
pub trait HiddenServiceHost: Send + Sync {
    /// Publish the service and return the local SOCKS port for outbound
    /// connections
    async fn start(&self, config: &HiddenServiceConfig) -> anyhow::Result<u16>;

    /// Withdraw the service. No-op when nothing is published.
    async fn stop(&self);
}

/// Where a running sharing service can be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingPorts {
    /// Local port of the status server
    pub listening: u16,
    /// SOCKS port for outbound connections into the Tor network
    pub socks_proxy: u16,
}

/// Status server plus hidden service
pub struct SharingService {
    host: Arc<dyn HiddenServiceHost>,
    bind_addr: SocketAddr,
    board: StatusBoard,
    server: Option<WebServer>,
    ports: watch::Sender<Option<SharingPorts>>,
}

impl SharingService {
    pub fn new(host: Arc<dyn HiddenServiceHost>, bind_addr: SocketAddr, board: StatusBoard) -> Self {
        Self {
            host,
            bind_addr,
            board,
            server: None,
            ports: watch::channel(None).0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    /// Ports of the running service, `None` while stopped
    pub fn ports(&self) -> watch::Receiver<Option<SharingPorts>> {
        self.ports.subscribe()
    }

    /// Start the status server, then the hidden service forwarding to it
    ///
    /// Anything already running is stopped first. If either half fails the
    /// other is torn down before `ServiceStart` is returned.
    pub async fn start(&mut self, identity: &Identity, friend_certificates: &[String]) -> Result<()> {
        self.stop().await;

        let server = match WebServer::start(
            self.bind_addr,
            &identity.key_material(),
            friend_certificates,
            self.board.clone(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                self.stop().await;
                return Err(Error::ServiceStart(e));
            },
        };

        let socks_port = match self.start_hidden_service(identity, server.listening_port()).await {
            Ok(port) => port,
            Err(e) => {
                self.host.stop().await;
                server.stop().await;
                return Err(Error::ServiceStart(e));
            },
        };

        info!(
            port = server.listening_port(),
            socks_port,
            address = %identity.hidden_service_address,
            "Sharing service started"
        );
        self.ports.send_replace(Some(SharingPorts {
            listening: server.listening_port(),
            socks_proxy: socks_port,
        }));
        self.server = Some(server);
        Ok(())
    }

    async fn start_hidden_service(
        &self,
        identity: &Identity,
        local_port: u16,
    ) -> anyhow::Result<u16> {
        let keys = identity
            .hidden_service_keys()
            .context("Invalid hidden service key")?;
        let forward_ip = if self.bind_addr.ip().is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.bind_addr.ip()
        };
        let config = HiddenServiceConfig {
            keys,
            forward_addr: SocketAddr::new(forward_ip, local_port),
        };
        self.host
            .start(&config)
            .await
            .context("Failed to start hidden service")
    }

    /// Stop the hidden service, then the status server. No-op when stopped.
    pub async fn stop(&mut self) {
        let Some(server) = self.server.take() else {
            return;
        };
        self.ports.send_replace(None);
        self.host.stop().await;
        server.stop().await;
        debug!("Sharing service stopped");
    }

    /// Local port of the status server
    pub fn listening_port(&self) -> Result<u16> {
        current_ports(&self.ports.borrow()).map(|p| p.listening)
    }

    /// SOCKS port for outbound connections into the Tor network
    pub fn socks_proxy_port(&self) -> Result<u16> {
        current_ports(&self.ports.borrow()).map(|p| p.socks_proxy)
    }
}

/// Ports from a [`SharingService::ports`] snapshot
pub fn current_ports(ports: &Option<SharingPorts>) -> Result<SharingPorts> {
    (*ports).ok_or(Error::NotRunning("sharing service"))
}

impl Drop for SharingService {
    fn drop(&mut self) {
        if self.server.is_some() {
            warn!("Sharing service dropped while running");
        }
    }
}
