//! Hidden service hosted by the local Tor daemon
//!
//! The service is created with ADD_ONION on a dedicated control connection
//! and is not detached, so it disappears when that connection closes.

use super::TorController;
use crate::config::TorConfig;
use crate::protocol::HIDDEN_SERVICE_PORT;
use crate::sharing::{HiddenServiceConfig, HiddenServiceHost};
use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Published {
    controller: TorController,
    service_id: String,
}

/// [`HiddenServiceHost`] backed by the Tor control port
pub struct TorHiddenService {
    config: TorConfig,
    published: Mutex<Option<Published>>,
}

impl TorHiddenService {
    pub fn new(config: TorConfig) -> Self {
        Self {
            config,
            published: Mutex::new(None),
        }
    }
}

#[async_trait]
impl HiddenServiceHost for TorHiddenService {
    async fn start(&self, service: &HiddenServiceConfig) -> Result<u16> {
        self.stop().await;

        let mut controller = TorController::connect(&self.config).await?;
        controller
            .wait_for_bootstrap(self.config.bootstrap_timeout())
            .await?;

        let expected = service.keys.onion_address();
        let response = controller
            .add_onion(
                &service.keys.expanded_secret_key(),
                HIDDEN_SERVICE_PORT,
                &service.forward_addr.to_string(),
                &["DiscardPK"],
            )
            .await?;
        if response.onion_address != expected {
            if let Err(e) = controller.del_onion(&response.service_id).await {
                debug!("Failed to remove mismatched service: {}", e);
            }
            bail!(
                "Tor published {} but the identity address is {}",
                response.onion_address,
                expected
            );
        }

        let socks_port = match controller.socks_listener_port().await {
            Ok(Some(port)) => port,
            Ok(None) => {
                debug!(
                    "Tor reported no SOCKS listener, using configured port {}",
                    self.config.socks_port
                );
                self.config.socks_port
            },
            Err(e) => {
                warn!(
                    "Failed to query SOCKS listener, using configured port {}: {}",
                    self.config.socks_port, e
                );
                self.config.socks_port
            },
        };

        info!(
            address = %response.onion_address,
            socks_port,
            "Hidden service published"
        );
        *self.published.lock().await = Some(Published {
            controller,
            service_id: response.service_id,
        });
        Ok(socks_port)
    }

    async fn stop(&self) {
        let Some(mut published) = self.published.lock().await.take() else {
            return;
        };
        // Closing the control connection removes the service anyway
        if let Err(e) = published.controller.del_onion(&published.service_id).await {
            debug!("DEL_ONION failed: {}", e);
        }
    }
}
