//! Application events
//!
//! Typed broadcast channel carrying requests into the engine and
//! notifications out to observers. Delivery is best-effort: publishing with
//! no subscribers, or to a subscriber that lagged, loses the event.

use crate::data::{Friend, PublicIdentity, Status};
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Requests consumed by the engine and notifications it produces
#[derive(Debug, Clone)]
pub enum Event {
    /// Local status published by the location monitor
    NewSelfStatus(Status),
    /// A friend's status fetched by its poll chain
    NewFriendStatus { friend_id: String, status: Status },
    /// A request event could not be completed
    RequestFailed { request_id: String, message: String },
    /// A new local identity was generated and persisted
    GeneratedSelf(PublicIdentity),
    RequestGenerateSelf { nickname: String, request_id: String },
    RequestAddFriend {
        public_identity: PublicIdentity,
        request_id: String,
    },
    RequestDeleteFriend { friend_id: String, request_id: String },
    AddedFriend(Friend),
    DeletedFriend(String),
}

impl Event {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewSelfStatus(_) => "new_self_status",
            Self::NewFriendStatus { .. } => "new_friend_status",
            Self::RequestFailed { .. } => "request_failed",
            Self::GeneratedSelf(_) => "generated_self",
            Self::RequestGenerateSelf { .. } => "request_generate_self",
            Self::RequestAddFriend { .. } => "request_add_friend",
            Self::RequestDeleteFriend { .. } => "request_delete_friend",
            Self::AddedFriend(_) => "added_friend",
            Self::DeletedFriend(_) => "deleted_friend",
        }
    }
}

/// In-process event bus
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish to every current subscriber
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        if self.sender.send(event).is_err() {
            trace!(kind, "Event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(Event::DeletedFriend("abc".to_string()));

        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap() {
                Event::DeletedFriend(id) => assert_eq!(id, "abc"),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        EventBus::new().publish(Event::RequestFailed {
            request_id: "1".to_string(),
            message: "nope".to_string(),
        });
    }
}
