//! Heartbeat pings and stale-connection eviction.
//!
//! The only component allowed to unregister a connection without a
//! client-initiated close. Sweeps tolerate connections that a concurrent
//! close already cleaned up.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use super::auth::TokenVerifier;
use super::dispatcher::EventDispatcher;
use super::events::{Envelope, ServerEvent};
use super::limiter::ConnectionRateLimiter;
use super::registry::PresenceRegistry;

pub struct LivenessMonitor {
    registry: Arc<PresenceRegistry>,
    dispatcher: Arc<EventDispatcher>,
    limiter: Arc<ConnectionRateLimiter>,
    verifier: Arc<TokenVerifier>,
    heartbeat_timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        dispatcher: Arc<EventDispatcher>,
        limiter: Arc<ConnectionRateLimiter>,
        verifier: Arc<TokenVerifier>,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            limiter,
            verifier,
            heartbeat_timeout,
        }
    }

    /// Send a heartbeat request to every connection.
    pub fn ping_all(&self) -> usize {
        let mut sent = 0;
        for conn_id in self.registry.connection_ids() {
            if self.registry.send(&conn_id, Envelope::stamp(ServerEvent::Ping)) {
                sent += 1;
            }
        }
        tracing::trace!(sent, "heartbeat pings sent");
        sent
    }

    /// Evict connections past the heartbeat timeout and purge expired
    /// rate-limit windows and cache entries. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let mut evicted = 0;
        for conn_id in self.registry.stale_connections(self.heartbeat_timeout) {
            // A concurrent close may have beaten us to it; that's fine.
            let Some(departure) = self.registry.unregister(&conn_id) else {
                continue;
            };
            tracing::info!(
                %conn_id,
                user_id = %departure.user_id,
                rooms = departure.departed_rooms.len(),
                "evicted stale connection"
            );
            self.dispatcher.broadcast_departure(&departure);
            evicted += 1;
        }

        let windows = self.limiter.sweep_expired();
        let messages = self.dispatcher.purge_expired_messages();
        let identities = self.verifier.purge_expired();
        tracing::debug!(evicted, windows, messages, identities, "liveness sweep complete");
        evicted
    }

    /// Run the ping and sweep loops until the process exits.
    pub fn spawn(self: &Arc<Self>, ping_interval: Duration, sweep_interval: Duration) -> Vec<JoinHandle<()>> {
        let ping_monitor = Arc::clone(self);
        let ping_task = tokio::spawn(async move {
            let mut timer = time::interval(ping_interval);
            timer.tick().await; // First tick fires immediately; skip it.
            loop {
                timer.tick().await;
                ping_monitor.ping_all();
            }
        });

        let sweep_monitor = Arc::clone(self);
        let sweep_task = tokio::spawn(async move {
            let mut timer = time::interval(sweep_interval);
            timer.tick().await;
            loop {
                timer.tick().await;
                sweep_monitor.sweep();
            }
        });

        vec![ping_task, sweep_task]
    }
}
