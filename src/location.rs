//! Local status source
//!
//! The location monitor publishes the local status to a [`StatusBoard`],
//! which the status server reads on every request, and announces it as a
//! `NewSelfStatus` event.

use crate::config::{LocationConfig, Preferences, LOCATION_SHARING_ENABLED};
use crate::data::Status;
use crate::events::{Event, EventBus};
use crate::util::time::unix_timestamp;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Latest local status, shared with the status server
#[derive(Clone, Default)]
pub struct StatusBoard {
    current: Arc<RwLock<Option<Status>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, status: Status) {
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(status);
    }

    pub fn current(&self) -> Option<Status> {
        self.current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

/// Fire-and-forget location source started and stopped with the engine
pub trait LocationMonitor: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

/// Reports a configured fixed position
pub struct FixedLocationMonitor {
    position: Option<LocationConfig>,
    preferences: Preferences,
    board: StatusBoard,
    events: EventBus,
}

impl FixedLocationMonitor {
    pub fn new(
        position: Option<LocationConfig>,
        preferences: Preferences,
        board: StatusBoard,
        events: EventBus,
    ) -> Self {
        Self {
            position,
            preferences,
            board,
            events,
        }
    }

    fn sharing_enabled(&self) -> bool {
        match self.preferences.get_bool(LOCATION_SHARING_ENABLED) {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Location sharing disabled: {}", e);
                false
            },
        }
    }
}

impl LocationMonitor for FixedLocationMonitor {
    fn start(&self) {
        if !self.sharing_enabled() {
            info!("Location sharing is disabled");
            self.board.clear();
            return;
        }
        let Some(position) = &self.position else {
            debug!("No fixed position configured");
            return;
        };

        let status = Status {
            timestamp: unix_timestamp(),
            latitude: position.latitude,
            longitude: position.longitude,
            precision: position.precision,
            street_address: position.street_address.clone(),
        };
        self.board.publish(status.clone());
        self.events.publish(Event::NewSelfStatus(status));
        debug!("Published fixed position");
    }

    fn stop(&self) {
        self.board.clear();
    }
}
