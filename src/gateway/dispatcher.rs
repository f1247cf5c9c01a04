//! Typed outbound event delivery to connections and rooms.
//!
//! Delivery is best-effort, at-most-once: a target with no live connection
//! is a silent drop, never an error. Every envelope is stamped at the moment
//! of the dispatch call, one stamp per call.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::id;

use super::cache::EphemeralCache;
use super::events::{Envelope, ServerEvent};
use super::registry::{Departure, PresenceRegistry};

/// Recent chat messages are kept this long for late-joiner context.
const MESSAGE_CACHE_TTL: Duration = Duration::from_secs(300);
const MESSAGE_CACHE_CAPACITY: usize = 512;

/// A chat message retained in the ephemeral cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMessage {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub message: String,
    pub kind: String,
    pub sent_at: DateTime<Utc>,
}

pub struct EventDispatcher {
    registry: Arc<PresenceRegistry>,
    messages: EphemeralCache<CachedMessage>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self {
            registry,
            messages: EphemeralCache::new(MESSAGE_CACHE_CAPACITY, MESSAGE_CACHE_TTL),
        }
    }

    /// Deliver an event to a user's routable connection. A user with no
    /// connection is a silent drop.
    pub fn send_to_user(&self, user_id: &str, event: ServerEvent) {
        let envelope = Envelope::stamp(event);
        match self.registry.connection_for(user_id) {
            Some(conn_id) => {
                self.registry.send(&conn_id, envelope);
            }
            None => {
                tracing::debug!(%user_id, "dropping event for offline user");
            }
        }
    }

    /// Deliver an event to every member of a room, optionally excluding one
    /// connection (so an actor is not notified about themself).
    pub fn broadcast_to_room(
        &self,
        room_id: &str,
        event: ServerEvent,
        exclude_conn_id: Option<&str>,
    ) {
        let envelope = Envelope::stamp(event);
        for user_id in self.registry.room_members(room_id) {
            let Some(conn_id) = self.registry.connection_for(&user_id) else {
                continue;
            };
            if exclude_conn_id == Some(conn_id.as_str()) {
                continue;
            }
            self.registry.send(&conn_id, envelope.clone());
        }
    }

    /// Deliver an event to everyone subscribed to the global notifications
    /// room.
    pub fn broadcast_global(&self, event: ServerEvent) {
        self.broadcast_to_room(super::rooms::NOTIFICATIONS_ROOM, event, None);
    }

    /// Broadcast a chat message into a room and retain it in the ephemeral
    /// cache. Returns the assigned message id.
    pub fn send_chat_message(
        &self,
        room_id: &str,
        sender_id: &str,
        message: &str,
        kind: &str,
    ) -> String {
        let message_id = id::prefixed_ulid(id::prefix::MESSAGE);

        self.messages.insert(
            format!("room:{room_id}:msg:{message_id}"),
            CachedMessage {
                message_id: message_id.clone(),
                room_id: room_id.to_string(),
                sender_id: sender_id.to_string(),
                message: message.to_string(),
                kind: kind.to_string(),
                sent_at: Utc::now(),
            },
        );

        self.broadcast_to_room(
            room_id,
            ServerEvent::Message {
                room_id: room_id.to_string(),
                message_id: message_id.clone(),
                sender_id: sender_id.to_string(),
                message: message.to_string(),
                kind: kind.to_string(),
            },
            None,
        );

        message_id
    }

    /// Broadcast the `userLeft` cascade for an unregistered connection.
    pub fn broadcast_departure(&self, departure: &Departure) {
        for room_id in &departure.departed_rooms {
            self.broadcast_to_room(
                room_id,
                ServerEvent::UserLeft {
                    room_id: room_id.clone(),
                    user_id: departure.user_id.clone(),
                },
                None,
            );
        }
    }

    /// Recently cached messages for a room, newest-last not guaranteed.
    pub fn recent_messages(&self, room_id: &str) -> Vec<CachedMessage> {
        self.messages.scan_prefix(&format!("room:{room_id}:msg:"))
    }

    /// Drop expired cached messages. Returns the number removed.
    pub fn purge_expired_messages(&self) -> usize {
        self.messages.purge_expired()
    }
}
