//! Friend poller
//!
//! One poll chain per friend: fetch the friend's status over Tor, publish
//! it, and schedule the next poll one period later. The chain is driven by
//! the scheduler, one task per poll, never by recursion.
//!
//! Only "friend not found" ends a chain. Every other failure is logged and
//! retried after a full period. Once the scheduler generation is stopped
//! the next reschedule is refused and the chain ends quietly.

use crate::client::{StatusFetcher, StatusRequest};
use crate::data::{Status, Store};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::protocol::GET_STATUS_REQUEST_PATH;
use crate::scheduler::{SchedulerHandle, Task};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// What a poll needs from the engine
#[async_trait]
pub trait PollContext: Send + Sync {
    fn store(&self) -> &dyn Store;
    fn events(&self) -> &EventBus;
    fn fetcher(&self) -> &dyn StatusFetcher;
    /// Fails with `NotRunning` while the sharing service is down
    async fn socks_proxy_port(&self) -> Result<u16>;
}

/// Friend ids with a live poll chain
#[derive(Clone, Default)]
pub struct ChainRegistry {
    live: Arc<Mutex<HashSet<String>>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a chain live. Returns false if one already is.
    pub fn claim(&self, friend_id: &str) -> bool {
        self.lock().insert(friend_id.to_string())
    }

    pub fn release(&self, friend_id: &str) {
        self.lock().remove(friend_id);
    }

    pub fn is_live(&self, friend_id: &str) -> bool {
        self.lock().contains(friend_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Status fetched and published
    Published,
    /// Friend no longer exists
    Terminated,
    /// Transient failure, retried after a period
    Failed,
}

/// One friend's poll chain
pub struct FriendPoller {
    ctx: Arc<dyn PollContext>,
    scheduler: SchedulerHandle,
    chains: ChainRegistry,
    friend_id: String,
    period: Duration,
}

impl FriendPoller {
    /// Start a chain for `friend_id` with an immediate first poll
    ///
    /// Returns false if a chain for this friend is already live or the
    /// scheduler is stopped.
    pub fn begin(
        ctx: Arc<dyn PollContext>,
        scheduler: SchedulerHandle,
        chains: ChainRegistry,
        friend_id: String,
        period: Duration,
    ) -> bool {
        if !chains.claim(&friend_id) {
            debug!(friend = %friend_id, "Poll chain already live");
            return false;
        }

        let poller = Arc::new(Self {
            ctx,
            scheduler,
            chains,
            friend_id,
            period,
        });
        if poller.scheduler.submit_now(Arc::clone(&poller).fire()) {
            debug!(friend = %poller.friend_id, "Poll chain started");
            true
        } else {
            poller.chains.release(&poller.friend_id);
            false
        }
    }

    fn fire(self: Arc<Self>) -> Task {
        Box::pin(async move {
            match self.poll_once().await {
                PollOutcome::Terminated => self.chains.release(&self.friend_id),
                PollOutcome::Published | PollOutcome::Failed => self.reschedule(),
            }
        })
    }

    fn reschedule(self: Arc<Self>) {
        let period = self.period;
        if self
            .scheduler
            .submit_after(Arc::clone(&self).fire(), period)
            .is_none()
        {
            debug!(friend = %self.friend_id, "Scheduler stopped, poll chain ends");
            self.chains.release(&self.friend_id);
        }
    }

    /// Fetch and publish once, without rescheduling
    pub async fn poll_once(&self) -> PollOutcome {
        match self.fetch().await {
            Ok(status) => {
                self.ctx.events().publish(Event::NewFriendStatus {
                    friend_id: self.friend_id.clone(),
                    status,
                });
                PollOutcome::Published
            },
            Err(Error::FriendNotFound(_)) => {
                debug!(friend = %self.friend_id, "Friend deleted, poll chain ends");
                PollOutcome::Terminated
            },
            Err(e) => {
                warn!(
                    friend = %self.friend_id,
                    retry_in = ?self.period,
                    "Status poll failed: {}",
                    e
                );
                PollOutcome::Failed
            },
        }
    }

    async fn fetch(&self) -> Result<Status> {
        let store = self.ctx.store();
        let friend = store.get_friend_by_id(&self.friend_id)?;
        let identity = store.get_self()?;
        let socks_proxy_port = self.ctx.socks_proxy_port().await?;

        let credentials = identity.key_material();
        let body = self
            .ctx
            .fetcher()
            .get(StatusRequest {
                client_credentials: &credentials,
                server_certificate: &friend.certificate,
                socks_proxy_port,
                address: &friend.hidden_service_address,
                path: GET_STATUS_REQUEST_PATH,
            })
            .await
            .map_err(Error::Request)?;

        serde_json::from_str(&body)
            .context("Malformed status response")
            .map_err(Error::Request)
    }
}
