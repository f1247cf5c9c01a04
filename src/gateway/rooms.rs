//! Join/leave semantics for caller-named channels.
//!
//! Rooms are implicitly created on first join and garbage-collected at zero
//! membership. No authorization model is imposed here: any authenticated
//! connection may join any room identifier, and access control for
//! domain-specific rooms is the caller's responsibility.

use std::sync::Arc;

use super::dispatcher::EventDispatcher;
use super::events::ServerEvent;
use super::registry::PresenceRegistry;

/// The well-known global notifications channel.
pub const NOTIFICATIONS_ROOM: &str = "notifications";

/// Room carrying updates for a single order.
pub fn order_room(order_id: &str) -> String {
    format!("order:{order_id}")
}

/// Room carrying inventory updates for a single product.
pub fn inventory_room(product_id: &str) -> String {
    format!("inventory:{product_id}")
}

pub struct RoomManager {
    registry: Arc<PresenceRegistry>,
    dispatcher: Arc<EventDispatcher>,
}

impl RoomManager {
    pub fn new(registry: Arc<PresenceRegistry>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Add the connection's user to a room and notify the other members.
    ///
    /// Joining a room already joined is a no-op and does not re-emit
    /// `userJoined`.
    pub fn join(&self, conn_id: &str, room_id: &str) {
        let Some(outcome) = self.registry.join_room(conn_id, room_id) else {
            tracing::debug!(%conn_id, %room_id, "join from unknown connection");
            return;
        };
        if !outcome.newly_joined {
            return;
        }

        tracing::debug!(%conn_id, user_id = %outcome.user_id, %room_id, "joined room");
        self.dispatcher.broadcast_to_room(
            room_id,
            ServerEvent::UserJoined {
                room_id: room_id.to_string(),
                user_id: outcome.user_id,
            },
            Some(conn_id),
        );
    }

    /// Remove the connection's user from a room and notify the remaining
    /// members. Leaving a room not joined is a no-op, no error.
    pub fn leave(&self, conn_id: &str, room_id: &str) {
        let Some(outcome) = self.registry.leave_room(conn_id, room_id) else {
            return;
        };
        if !outcome.was_member {
            return;
        }

        tracing::debug!(%conn_id, user_id = %outcome.user_id, %room_id, "left room");
        self.dispatcher.broadcast_to_room(
            room_id,
            ServerEvent::UserLeft {
                room_id: room_id.to_string(),
                user_id: outcome.user_id,
            },
            Some(conn_id),
        );
    }
}
