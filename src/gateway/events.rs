//! Wire-format commands and events.
//!
//! Both directions use one JSON shape: `{"type": ..., "payload": ...}`.
//! Outbound frames additionally carry a `timestamp` stamped at dispatch time,
//! so the ordering a client observes reflects delivery order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Client → Server commands
// ---------------------------------------------------------------------------

/// A command received from the client over WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Re-asserts identity. A no-op: identity is attached at the handshake
    /// and a connection cannot re-authenticate as a different user.
    Authenticate { token: String },
    SubscribeToNotifications,
    UnsubscribeFromNotifications,
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_id: String,
        message: String,
        #[serde(default = "default_message_kind")]
        kind: String,
    },
    #[serde(rename_all = "camelCase")]
    SubscribeToOrder { order_id: String },
    #[serde(rename_all = "camelCase")]
    UnsubscribeFromOrder { order_id: String },
    #[serde(rename_all = "camelCase")]
    SubscribeToInventory { product_id: String },
    #[serde(rename_all = "camelCase")]
    UnsubscribeFromInventory { product_id: String },
    UpdatePresence { status: String },
    /// Heartbeat acknowledgement; refreshes the liveness timestamp.
    Pong,
}

fn default_message_kind() -> String {
    "text".to_string()
}

// ---------------------------------------------------------------------------
// Server → Client events
// ---------------------------------------------------------------------------

/// An event sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    Notification { notification: Value },
    #[serde(rename_all = "camelCase")]
    OrderUpdate { order_id: String, update: Value },
    #[serde(rename_all = "camelCase")]
    InventoryUpdate { product_id: String, update: Value },
    #[serde(rename_all = "camelCase")]
    Message {
        room_id: String,
        message_id: String,
        sender_id: String,
        message: String,
        kind: String,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined { room_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    UserLeft { room_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    ConnectionStatus { user_id: String, status: String },
    Error { code: String, message: String },
    Ping,
}

/// A [`ServerEvent`] stamped with the dispatch-time timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: ServerEvent,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wrap an event, stamping it with the current time.
    pub fn stamp(event: ServerEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}
