//! Engine
//!
//! Top-level orchestrator. `start()` brings up, in order: a fresh scheduler
//! generation, location monitoring, the sharing service, one poll chain per
//! known friend, and the preference and request observers. `stop()` tears
//! all of it down; pending polls die with their scheduler generation.
//!
//! Every entry point runs under one async lock, so start, stop, restarts
//! and request handlers never interleave. Task bodies (polls, identity
//! generation, sharing restarts) run outside the lock. The sharing service
//! has a lock of its own, and its ports are read from a watch channel.
//!
//! A preference change restarts the whole engine. If that restart fails
//! the engine stays stopped and reports `EngineHealth::Degraded`.

use crate::client::StatusFetcher;
use crate::config::{Preferences, FRIEND_POLL_PERIOD_MS};
use crate::crypto::CredentialGenerator;
use crate::data::{Friend, PublicIdentity, Store};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::location::{LocationMonitor, StatusBoard};
use crate::poller::{ChainRegistry, FriendPoller, PollContext};
use crate::scheduler::{Scheduler, SchedulerHandle, Task, TaskHandle};
use crate::util::time::format_duration;
use crate::sharing::{current_ports, HiddenServiceHost, SharingPorts, SharingService};
use anyhow::Context;
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(60_000);

/// Externally observable engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineHealth {
    Stopped,
    Running,
    /// A restart the engine triggered itself failed
    Degraded { reason: String },
}

/// Collaborators the engine is built from
pub struct EngineParts {
    pub store: Arc<dyn Store>,
    pub preferences: Preferences,
    pub events: EventBus,
    pub board: StatusBoard,
    pub location: Arc<dyn LocationMonitor>,
    pub host: Arc<dyn HiddenServiceHost>,
    pub fetcher: Arc<dyn StatusFetcher>,
    pub generator: Arc<dyn CredentialGenerator>,
    /// Local address for the status server
    pub bind_addr: SocketAddr,
}

struct EngineState {
    running: bool,
    scheduler: Scheduler,
    chains: ChainRegistry,
    observers: Vec<JoinHandle<()>>,
    /// Background sharing restart, at most one at a time
    sharing_restart: Option<JoinHandle<()>>,
}

impl EngineState {
    fn cancel_sharing_restart(&mut self) -> Option<JoinHandle<()>> {
        let restart = self.sharing_restart.take()?;
        restart.abort();
        Some(restart)
    }
}

impl Drop for EngineState {
    fn drop(&mut self) {
        for observer in self.observers.drain(..) {
            observer.abort();
        }
        let _ = self.cancel_sharing_restart();
    }
}

struct EngineInner {
    store: Arc<dyn Store>,
    preferences: Preferences,
    events: EventBus,
    location: Arc<dyn LocationMonitor>,
    generator: Arc<dyn CredentialGenerator>,
    poll_context: Arc<dyn PollContext>,
    state: Mutex<EngineState>,
    sharing: Mutex<SharingService>,
    sharing_ports: watch::Receiver<Option<SharingPorts>>,
    health: watch::Sender<EngineHealth>,
}

/// Cloneable handle to one engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Poll context that reads the sharing ports without the engine lock
struct EnginePollContext {
    ports: watch::Receiver<Option<SharingPorts>>,
    store: Arc<dyn Store>,
    events: EventBus,
    fetcher: Arc<dyn StatusFetcher>,
}

#[async_trait]
impl PollContext for EnginePollContext {
    fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn fetcher(&self) -> &dyn StatusFetcher {
        self.fetcher.as_ref()
    }

    async fn socks_proxy_port(&self) -> Result<u16> {
        current_ports(&self.ports.borrow()).map(|p| p.socks_proxy)
    }
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        let (health, _) = watch::channel(EngineHealth::Stopped);
        let sharing = SharingService::new(parts.host, parts.bind_addr, parts.board);
        let sharing_ports = sharing.ports();
        let poll_context: Arc<dyn PollContext> = Arc::new(EnginePollContext {
            ports: sharing.ports(),
            store: Arc::clone(&parts.store),
            events: parts.events.clone(),
            fetcher: parts.fetcher,
        });
        let inner = Arc::new(EngineInner {
            store: parts.store,
            preferences: parts.preferences,
            events: parts.events,
            location: parts.location,
            generator: parts.generator,
            poll_context,
            state: Mutex::new(EngineState {
                running: false,
                scheduler: Scheduler::new(),
                chains: ChainRegistry::new(),
                observers: Vec::new(),
                sharing_restart: None,
            }),
            sharing: Mutex::new(sharing),
            sharing_ports,
            health,
        });
        Self { inner }
    }

    fn downgrade(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn preferences(&self) -> &Preferences {
        &self.inner.preferences
    }

    /// Watch the engine's health
    pub fn health(&self) -> watch::Receiver<EngineHealth> {
        self.inner.health.subscribe()
    }

    fn set_health(&self, health: EngineHealth) {
        self.inner.health.send_replace(health);
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    /// Start everything. No-op if already running.
    ///
    /// On failure everything already started is stopped again before the
    /// error is returned.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.start_locked(&mut state).await
    }

    /// Stop everything. Safe to call repeatedly or before `start()`.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    /// Stop then start under one lock
    ///
    /// Used for preference changes. A failed start is not returned; it
    /// leaves the engine stopped with `EngineHealth::Degraded`.
    pub async fn restart(&self) {
        let mut state = self.inner.state.lock().await;
        self.stop_locked(&mut state).await;
        if let Err(e) = self.start_locked(&mut state).await {
            error!("Engine restart failed, engine is stopped: {}", e);
            self.set_health(EngineHealth::Degraded {
                reason: e.to_string(),
            });
        }
    }

    async fn start_locked(&self, state: &mut EngineState) -> Result<()> {
        if state.running {
            return Ok(());
        }
        match self.bring_up(state).await {
            Ok(()) => {
                state.running = true;
                self.set_health(EngineHealth::Running);
                info!(friends = state.chains.len(), "Engine started");
                Ok(())
            },
            Err(e) => {
                self.stop_locked(state).await;
                Err(e)
            },
        }
    }

    async fn bring_up(&self, state: &mut EngineState) -> Result<()> {
        let scheduler = state.scheduler.start()?;
        self.inner.location.start();
        let friends = self.start_sharing().await?;

        let period = self.friend_poll_period()?;
        debug!(
            "Polling {} friend(s) every {}",
            friends.len(),
            format_duration(period)
        );
        state.chains = ChainRegistry::new();
        for friend in friends {
            FriendPoller::begin(
                Arc::clone(&self.inner.poll_context),
                scheduler.clone(),
                state.chains.clone(),
                friend.id,
                period,
            );
        }

        state.observers.push(tokio::spawn(watch_preferences(
            self.downgrade(),
            self.inner.preferences.subscribe(),
        )));
        state.observers.push(tokio::spawn(listen_events(
            self.downgrade(),
            self.inner.events.subscribe(),
        )));
        Ok(())
    }

    async fn stop_locked(&self, state: &mut EngineState) {
        for observer in state.observers.drain(..) {
            observer.abort();
        }
        if let Some(restart) = state.cancel_sharing_restart() {
            let _ = restart.await;
        }
        self.inner.sharing.lock().await.stop().await;
        self.inner.location.stop();
        state.scheduler.stop();

        if state.running {
            state.running = false;
            info!("Engine stopped");
        }
        self.set_health(EngineHealth::Stopped);
    }

    /// (Re)start the sharing service with the stored identity and friends
    async fn start_sharing(&self) -> Result<Vec<Friend>> {
        let identity = self.inner.store.get_self()?;
        let friends = self.inner.store.get_friends()?;
        let certificates: Vec<String> = friends.iter().map(|f| f.certificate.clone()).collect();
        self.inner
            .sharing
            .lock()
            .await
            .start(&identity, &certificates)
            .await?;
        Ok(friends)
    }

    /// Restart the sharing service in the background
    ///
    /// Picks up a new identity or a changed friend allowlist. A restart
    /// still in flight is aborted and replaced. `stop()` cancels it.
    fn queue_sharing_restart(&self, state: &mut EngineState) {
        let _ = state.cancel_sharing_restart();
        let engine = self.clone();
        state.sharing_restart = Some(tokio::spawn(engine.restart_sharing()));
    }

    /// Failure is reported through health, since no caller is waiting
    async fn restart_sharing(self) {
        let result = self.start_sharing().await;

        let state = self.inner.state.lock().await;
        if !state.running {
            return;
        }
        match result {
            Ok(_) => self.set_health(EngineHealth::Running),
            Err(e) => {
                error!("Failed to restart sharing service: {}", e);
                self.set_health(EngineHealth::Degraded {
                    reason: e.to_string(),
                });
            },
        }
    }

    fn friend_poll_period(&self) -> Result<Duration> {
        let millis = self.get_int_preference(FRIEND_POLL_PERIOD_MS)?;
        match u64::try_from(millis) {
            Ok(millis) if millis > 0 => Ok(Duration::from_millis(millis)),
            _ => {
                warn!(
                    "Ignoring invalid {} = {}, using {:?}",
                    FRIEND_POLL_PERIOD_MS, millis, DEFAULT_POLL_PERIOD
                );
                Ok(DEFAULT_POLL_PERIOD)
            },
        }
    }

    /// Hand `task` to the worker pool
    pub async fn submit_task<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.inner.state.lock().await;
        if state.scheduler.submit_now(task) {
            Ok(())
        } else {
            Err(Error::NotRunning("scheduler"))
        }
    }

    /// Hand `task` to the worker pool after `delay`
    pub async fn schedule_task<F>(&self, task: F, delay: Duration) -> Result<TaskHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.inner.state.lock().await;
        state
            .scheduler
            .submit_after(task, delay)
            .ok_or(Error::NotRunning("scheduler"))
    }

    /// Current scheduler generation, while running
    pub async fn scheduler(&self) -> Option<SchedulerHandle> {
        self.inner.state.lock().await.scheduler.handle()
    }

    /// True while a poll chain for `friend_id` is live
    pub async fn is_polling(&self, friend_id: &str) -> bool {
        let state = self.inner.state.lock().await;
        state.running && state.chains.is_live(friend_id)
    }

    pub async fn tor_socks_proxy_port(&self) -> Result<u16> {
        current_ports(&self.inner.sharing_ports.borrow()).map(|p| p.socks_proxy)
    }

    pub async fn listening_port(&self) -> Result<u16> {
        current_ports(&self.inner.sharing_ports.borrow()).map(|p| p.listening)
    }

    pub fn get_boolean_preference(&self, key: &str) -> Result<bool> {
        self.inner.preferences.get_bool(key)
    }

    pub fn get_int_preference(&self, key: &str) -> Result<i64> {
        self.inner.preferences.get_int(key)
    }

    /// Queue generation of a new local identity
    ///
    /// The sharing service is stopped while credentials are generated and
    /// always restarted afterwards: with the new identity on success, the
    /// previous one on failure.
    pub async fn request_generate_self(&self, nickname: String, request_id: String) -> Result<()> {
        let state = self.inner.state.lock().await;
        if state.scheduler.submit_now(self.clone().generate_self(nickname, request_id)) {
            Ok(())
        } else {
            Err(Error::NotRunning("engine"))
        }
    }

    fn generate_self(self, nickname: String, request_id: String) -> Task {
        Box::pin(async move {
            self.inner.sharing.lock().await.stop().await;

            let generator = Arc::clone(&self.inner.generator);
            let generated = tokio::task::spawn_blocking(move || generator.generate(&nickname))
                .await
                .context("Credential generation task failed")
                .and_then(|result| result);

            let outcome = generated.and_then(|identity| {
                self.inner
                    .store
                    .update_self(&identity)
                    .context("Failed to store new identity")?;
                Ok(identity)
            });
            match outcome {
                Ok(identity) => {
                    info!(address = %identity.hidden_service_address, "Generated new identity");
                    self.inner
                        .events
                        .publish(Event::GeneratedSelf(identity.public_identity()));
                },
                Err(e) => {
                    warn!("Identity generation failed: {:#}", e);
                    self.inner.events.publish(Event::RequestFailed {
                        request_id,
                        message: format!("{:#}", e),
                    });
                },
            }

            let mut state = self.inner.state.lock().await;
            if state.running {
                self.queue_sharing_restart(&mut state);
            }
        })
    }

    /// Validate and store a friend
    ///
    /// A new friend gets a poll chain straight away. Either way the sharing
    /// service is restarted in the background to refresh its allowlist.
    /// Returns true if the friend was new.
    pub async fn add_friend(&self, public_identity: PublicIdentity) -> Result<bool> {
        let mut state = self.inner.state.lock().await;

        let friend = Friend::from_public_identity(public_identity)?;
        match self.inner.store.get_self() {
            Ok(identity) if friend.is_identity(&identity) => {
                return Err(Error::InvalidFriend(
                    "cannot add the local identity as a friend".to_string(),
                ));
            },
            Ok(_) | Err(Error::SelfNotFound) => {},
            Err(e) => return Err(e),
        }
        let period = state
            .running
            .then(|| self.friend_poll_period())
            .transpose()?;

        let inserted = self.inner.store.insert_or_update_friend(&friend)?;
        info!(friend = %friend.id, nickname = %friend.nickname, inserted, "Stored friend");
        self.inner.events.publish(Event::AddedFriend(friend.clone()));

        if let Some(period) = period {
            if inserted {
                if let Some(scheduler) = state.scheduler.handle() {
                    FriendPoller::begin(
                        Arc::clone(&self.inner.poll_context),
                        scheduler,
                        state.chains.clone(),
                        friend.id.clone(),
                        period,
                    );
                }
            }
            self.queue_sharing_restart(&mut state);
        }
        Ok(inserted)
    }

    /// Remove a friend
    ///
    /// An in-flight poll is not cancelled; the chain ends on its next
    /// firing when the lookup finds nothing.
    pub async fn delete_friend(&self, friend_id: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.inner.store.delete_friend(friend_id)?;
        info!(friend = %friend_id, "Deleted friend");
        self.inner
            .events
            .publish(Event::DeletedFriend(friend_id.to_string()));

        if state.running {
            self.queue_sharing_restart(&mut state);
        }
        Ok(())
    }

    /// Dispatch a request event; failures are published as `RequestFailed`
    pub async fn handle_event(&self, event: Event) {
        let (request_id, result) = match event {
            Event::RequestGenerateSelf {
                nickname,
                request_id,
            } => (
                request_id.clone(),
                self.request_generate_self(nickname, request_id).await,
            ),
            Event::RequestAddFriend {
                public_identity,
                request_id,
            } => (request_id, self.add_friend(public_identity).await.map(|_| ())),
            Event::RequestDeleteFriend {
                friend_id,
                request_id,
            } => (request_id, self.delete_friend(&friend_id).await),
            _ => return,
        };

        if let Err(e) = result {
            warn!(request = %request_id, "Request failed: {}", e);
            self.inner.events.publish(Event::RequestFailed {
                request_id,
                message: e.to_string(),
            });
        }
    }
}

/// Restarts the engine on every preference change
///
/// The restart runs as its own task because it aborts this observer.
fn watch_preferences(engine: Weak<EngineInner>, mut changes: broadcast::Receiver<String>) -> Task {
    Box::pin(async move {
        loop {
            match changes.recv().await {
                Ok(key) => info!(key = %key, "Preference changed, restarting engine"),
                Err(RecvError::Lagged(missed)) => {
                    info!(missed, "Preferences changed, restarting engine");
                },
                Err(RecvError::Closed) => return,
            }
            let Some(inner) = engine.upgrade() else {
                return;
            };
            let engine = Engine { inner };
            tokio::spawn(async move { engine.restart().await });
        }
    })
}

/// Dispatches request events while the engine runs
fn listen_events(engine: Weak<EngineInner>, mut events: broadcast::Receiver<Event>) -> Task {
    Box::pin(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event listener lagged, requests were dropped");
                    continue;
                },
                Err(RecvError::Closed) => return,
            };
            if !matches!(
                event,
                Event::RequestGenerateSelf { .. }
                    | Event::RequestAddFriend { .. }
                    | Event::RequestDeleteFriend { .. }
            ) {
                continue;
            }
            let Some(inner) = engine.upgrade() else {
                return;
            };
            let engine = Engine { inner };
            tokio::spawn(async move { engine.handle_event(event).await });
        }
    })
}
