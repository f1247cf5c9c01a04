pub mod config;
pub mod error;
pub mod gateway;
pub mod id;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde_json::Value;
use tokio::task::JoinHandle;

use config::Config;
use gateway::auth::TokenVerifier;
use gateway::dispatcher::EventDispatcher;
use gateway::events::ServerEvent;
use gateway::limiter::ConnectionRateLimiter;
use gateway::liveness::LivenessMonitor;
use gateway::registry::PresenceRegistry;
use gateway::rooms::{self, RoomManager};

/// Shared state available to the WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<PresenceRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
    pub rooms: Arc<RoomManager>,
    pub limiter: Arc<ConnectionRateLimiter>,
    pub verifier: Arc<TokenVerifier>,
}

/// The real-time gateway. Owns all in-memory connection state for this
/// process; the rest of the backend pushes events through the methods below
/// instead of going over the wire protocol.
///
/// Known limitation: a single process owns all connections. Running multiple
/// instances would need an external fan-out bus to propagate broadcasts.
pub struct Gateway {
    state: AppState,
    monitor: Arc<LivenessMonitor>,
}

impl Gateway {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(PresenceRegistry::new(config.allow_multiple_sessions));
        let dispatcher = Arc::new(EventDispatcher::new(registry.clone()));
        let room_manager = Arc::new(RoomManager::new(registry.clone(), dispatcher.clone()));
        let limiter = Arc::new(ConnectionRateLimiter::new(
            config.conn_rate_limit,
            Duration::from_secs(config.conn_rate_window_secs),
        ));
        let verifier = Arc::new(TokenVerifier::new(&config.jwt_secret));
        let monitor = Arc::new(LivenessMonitor::new(
            registry.clone(),
            dispatcher.clone(),
            limiter.clone(),
            verifier.clone(),
            Duration::from_secs(config.heartbeat_timeout_secs),
        ));

        Self {
            state: AppState {
                config: Arc::new(config),
                registry,
                dispatcher,
                rooms: room_manager,
                limiter,
                verifier,
            },
            monitor,
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// The `/ws` and `/health` routes with state applied.
    pub fn router(&self) -> Router {
        gateway::server::router().with_state(self.state.clone())
    }

    /// Start the heartbeat ping and liveness sweep loops.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        self.monitor.spawn(
            Duration::from_secs(self.state.config.heartbeat_interval_secs),
            Duration::from_secs(self.state.config.sweep_interval_secs),
        )
    }

    // -----------------------------------------------------------------------
    // Programmatic interface for the rest of the backend
    // -----------------------------------------------------------------------

    /// Deliver a notification to one user. A disconnected user is a silent
    /// drop — expected and non-exceptional.
    pub fn send_notification(&self, user_id: &str, notification: Value) {
        self.state
            .dispatcher
            .send_to_user(user_id, ServerEvent::Notification { notification });
    }

    /// Deliver a notification to every subscriber of the global
    /// notifications channel.
    pub fn broadcast_notification(&self, notification: Value) {
        self.state
            .dispatcher
            .broadcast_global(ServerEvent::Notification { notification });
    }

    /// Push an order update to everyone subscribed to that order.
    pub fn send_order_update(&self, order_id: &str, update: Value) {
        self.state.dispatcher.broadcast_to_room(
            &rooms::order_room(order_id),
            ServerEvent::OrderUpdate {
                order_id: order_id.to_string(),
                update,
            },
            None,
        );
    }

    /// Push an inventory update to everyone subscribed to that product.
    pub fn send_inventory_update(&self, product_id: &str, update: Value) {
        self.state.dispatcher.broadcast_to_room(
            &rooms::inventory_room(product_id),
            ServerEvent::InventoryUpdate {
                product_id: product_id.to_string(),
                update,
            },
            None,
        );
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.state.registry.is_online(user_id)
    }

    pub fn connected_users(&self) -> Vec<String> {
        self.state.registry.connected_users()
    }
}
