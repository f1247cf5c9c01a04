//! Inbound command dispatch.
//!
//! Every command is handled to completion inside one call; failures are
//! reported as [`CommandError`] and converted to an `error` event by the
//! caller. No command failure terminates the connection.

use crate::error::CommandError;
use crate::AppState;

use super::events::{ClientCommand, ServerEvent};
use super::rooms::{self, NOTIFICATIONS_ROOM};

/// Process one inbound command from an authenticated connection.
pub fn handle_command(
    state: &AppState,
    conn_id: &str,
    user_id: &str,
    command: ClientCommand,
) -> Result<(), CommandError> {
    match command {
        ClientCommand::Authenticate { .. } => {
            // Identity was attached at the handshake; the connection cannot
            // re-authenticate as a different user.
            tracing::debug!(%conn_id, "re-authenticate ignored");
            Ok(())
        }
        ClientCommand::SubscribeToNotifications => {
            state.rooms.join(conn_id, NOTIFICATIONS_ROOM);
            Ok(())
        }
        ClientCommand::UnsubscribeFromNotifications => {
            state.rooms.leave(conn_id, NOTIFICATIONS_ROOM);
            Ok(())
        }
        ClientCommand::JoinRoom { room_id } => {
            state.rooms.join(conn_id, &room_id);
            Ok(())
        }
        ClientCommand::LeaveRoom { room_id } => {
            state.rooms.leave(conn_id, &room_id);
            Ok(())
        }
        ClientCommand::SendMessage {
            room_id,
            message,
            kind,
        } => {
            if message.trim().is_empty() {
                return Err(CommandError::EmptyMessage);
            }
            // Membership is per-user: any of the user's sessions having
            // joined the room is enough to publish into it.
            if !state.registry.user_in_room(user_id, &room_id) {
                return Err(CommandError::NotInRoom { room_id });
            }
            state
                .dispatcher
                .send_chat_message(&room_id, user_id, &message, &kind);
            Ok(())
        }
        ClientCommand::SubscribeToOrder { order_id } => {
            state.rooms.join(conn_id, &rooms::order_room(&order_id));
            Ok(())
        }
        ClientCommand::UnsubscribeFromOrder { order_id } => {
            state.rooms.leave(conn_id, &rooms::order_room(&order_id));
            Ok(())
        }
        ClientCommand::SubscribeToInventory { product_id } => {
            state
                .rooms
                .join(conn_id, &rooms::inventory_room(&product_id));
            Ok(())
        }
        ClientCommand::UnsubscribeFromInventory { product_id } => {
            state
                .rooms
                .leave(conn_id, &rooms::inventory_room(&product_id));
            Ok(())
        }
        ClientCommand::UpdatePresence { status } => {
            for room_id in state.registry.rooms_of(conn_id) {
                state.dispatcher.broadcast_to_room(
                    &room_id,
                    ServerEvent::ConnectionStatus {
                        user_id: user_id.to_string(),
                        status: status.clone(),
                    },
                    Some(conn_id),
                );
            }
            Ok(())
        }
        ClientCommand::Pong => {
            state.registry.touch_heartbeat(conn_id);
            Ok(())
        }
    }
}
