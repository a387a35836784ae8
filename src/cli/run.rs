//! Daemon mode
//!
//! Wires the engine to its production collaborators, starts it and runs
//! until SIGINT/SIGTERM. SIGHUP re-reads the `[preferences]` table and
//! restarts the engine so identity and friend changes made with the other
//! commands take effect.

use crate::client::WebClient;
use crate::config::{self, Config};
use crate::crypto::LocalCredentialGenerator;
use crate::data::{JsonStore, Store};
use crate::engine::{Engine, EngineHealth, EngineParts};
use crate::events::{Event, EventBus};
use crate::location::{FixedLocationMonitor, StatusBoard};
use crate::tor::TorHiddenService;
use crate::VERSION;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, error, info, warn};

pub async fn run_daemon(config_path: Option<&Path>, config: Config) -> Result<()> {
    info!("Whereabouts v{} starting", VERSION);

    let engine = build_engine(&config)?;
    let event_log = tokio::spawn(log_events(engine.events().subscribe()));

    engine.start().await.context("Failed to start engine")?;

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut health = engine.health();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = terminate.recv() => {
                info!("Terminated, shutting down");
                break;
            }
            _ = hangup.recv() => reload(&engine, config_path).await,
            Ok(()) = health.changed() => {
                let current = health.borrow_and_update().clone();
                if let EngineHealth::Degraded { reason } = current {
                    error!("Engine degraded: {}. Send SIGHUP to retry.", reason);
                }
            }
        }
    }

    engine.stop().await;
    event_log.abort();
    info!("Stopped");
    Ok(())
}

fn build_engine(config: &Config) -> Result<Engine> {
    let store: Arc<dyn Store> = Arc::new(JsonStore::open(&config.data.dir)?);

    let preferences = config::Preferences::with_defaults();
    preferences
        .apply(&config.preferences)
        .context("Invalid [preferences]")?;

    let events = EventBus::new();
    let board = StatusBoard::new();
    let location = Arc::new(FixedLocationMonitor::new(
        config.location.clone(),
        preferences.clone(),
        board.clone(),
        events.clone(),
    ));

    Ok(Engine::new(EngineParts {
        store,
        preferences,
        events,
        board,
        location,
        host: Arc::new(TorHiddenService::new(config.tor.clone())),
        fetcher: Arc::new(WebClient::new(&config.client)),
        generator: Arc::new(LocalCredentialGenerator),
        bind_addr: SocketAddr::new(config.sharing.bind_address, config.sharing.port),
    }))
}

/// Apply reloaded preferences, then restart
///
/// A running engine restarts itself on preference changes, so an explicit
/// restart is only needed when nothing changed or the engine is down.
async fn reload(engine: &Engine, config_path: Option<&Path>) {
    info!("SIGHUP received, reloading configuration");
    let config = match config::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Reload failed, keeping current settings: {:#}", e);
            return;
        },
    };

    let running = engine.is_running().await;
    match engine.preferences().apply(&config.preferences) {
        Ok(changed) if changed > 0 && running => {
            info!("{} preference(s) changed", changed)
        },
        Ok(_) => engine.restart().await,
        Err(e) => error!("Reload failed, keeping current settings: {}", e),
    }
}

async fn log_events(mut events: Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(Event::NewFriendStatus { friend_id, status }) => info!(
                friend = %friend_id,
                latitude = status.latitude,
                longitude = status.longitude,
                precision = status.precision,
                timestamp = status.timestamp,
                "Friend status: {}",
                status.street_address
            ),
            Ok(Event::RequestFailed {
                request_id,
                message,
            }) => warn!("Request {} failed: {}", request_id, message),
            Ok(Event::GeneratedSelf(identity)) => {
                info!("New identity {}", identity.hidden_service_address)
            },
            Ok(Event::AddedFriend(friend)) => {
                info!("Friend {} ({}) added", friend.nickname, friend.id)
            },
            Ok(Event::DeletedFriend(id)) => info!("Friend {} deleted", id),
            Ok(other) => debug!("Event: {}", other.kind()),
            Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}
