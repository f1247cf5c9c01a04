//! In-memory presence registry: user ↔ connection ↔ room maps.
//!
//! Single source of truth for "who is online and where". The registry owns
//! every connection's outbound queue for its lifetime; no other component
//! holds a long-lived reference to one.
//!
//! `user_index` is single-valued in both session policies, so at any point
//! each user maps to at most one routable connection and each connection to
//! at most one user.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use super::events::{Envelope, ServerEvent};

/// Per-connection state. Created after a successful handshake; destroyed on
/// transport close or eviction by the liveness sweep.
struct ConnectionEntry {
    user_id: String,
    rooms: HashSet<String>,
    connected_at: Instant,
    last_heartbeat: Instant,
    sender: UnboundedSender<Envelope>,
}

/// Outcome of registering a connection for a user who may already be online.
#[derive(Debug)]
pub enum Registration {
    /// The user had no prior connection.
    Fresh,
    /// Multiple sessions are disallowed; the previous connection was
    /// unregistered and its departure cascade is returned.
    Evicted { previous: Departure },
    /// Multiple sessions are allowed; the previous connection stays open but
    /// the user now routes to the new one (last-connected-wins).
    Superseded { previous: String },
}

/// What a connection left behind when it was unregistered.
#[derive(Debug)]
pub struct Departure {
    pub conn_id: String,
    pub user_id: String,
    /// Rooms the user actually departed (no other live connection of the
    /// same user still has them joined). `userLeft` should be broadcast to
    /// each.
    pub departed_rooms: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    pub user_id: String,
    /// False when the user was already a member (re-join is a no-op).
    pub newly_joined: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub user_id: String,
    /// False when the user was not a member (leave is a no-op).
    pub was_member: bool,
}

/// Thread-safe presence registry backed by DashMap.
pub struct PresenceRegistry {
    connections: DashMap<String, Mutex<ConnectionEntry>>,
    user_index: DashMap<String, String>,
    rooms: DashMap<String, HashSet<String>>,
    allow_multiple_sessions: bool,
}

impl PresenceRegistry {
    pub fn new(allow_multiple_sessions: bool) -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            rooms: DashMap::new(),
            allow_multiple_sessions,
        }
    }

    /// Register an authenticated connection.
    ///
    /// When the user already has a routable connection the session policy
    /// decides: evict the old connection, or keep it open and route to the
    /// new one.
    pub fn register(
        &self,
        conn_id: String,
        user_id: String,
        sender: UnboundedSender<Envelope>,
    ) -> Registration {
        let previous = self.user_index.get(&user_id).map(|r| r.value().clone());

        let now = Instant::now();
        self.connections.insert(
            conn_id.clone(),
            Mutex::new(ConnectionEntry {
                user_id: user_id.clone(),
                rooms: HashSet::new(),
                connected_at: now,
                last_heartbeat: now,
                sender,
            }),
        );
        self.user_index.insert(user_id.clone(), conn_id.clone());

        match previous {
            None => Registration::Fresh,
            Some(prev) if prev == conn_id => Registration::Fresh,
            Some(prev) => {
                if self.allow_multiple_sessions {
                    Registration::Superseded { previous: prev }
                } else {
                    self.send(
                        &prev,
                        Envelope::stamp(ServerEvent::ConnectionStatus {
                            user_id,
                            status: "replaced".to_string(),
                        }),
                    );
                    match self.unregister(&prev) {
                        Some(departure) => Registration::Evicted {
                            previous: departure,
                        },
                        None => Registration::Fresh,
                    }
                }
            }
        }
    }

    /// Remove a connection and cascade its room memberships.
    ///
    /// Returns `None` if the connection is already gone — callers racing a
    /// concurrent close (the liveness sweep in particular) treat that as a
    /// no-op, not an error.
    pub fn unregister(&self, conn_id: &str) -> Option<Departure> {
        let (_, entry) = self.connections.remove(conn_id)?;
        let entry = entry.into_inner();
        let user_id = entry.user_id;

        self.user_index
            .remove_if(&user_id, |_, routable| routable == conn_id);

        // The user stays routable through a surviving connection, newest
        // first. Without this the user would be online but unreachable.
        if !self.user_index.contains_key(&user_id) {
            if let Some(next) = self.newest_connection_of(&user_id) {
                self.user_index.insert(user_id.clone(), next);
            }
        }

        let mut departed_rooms = Vec::new();
        for room_id in entry.rooms {
            if self.user_has_room_elsewhere(&user_id, &room_id) {
                continue;
            }
            if self.remove_member(&room_id, &user_id) {
                departed_rooms.push(room_id);
            }
        }

        Some(Departure {
            conn_id: conn_id.to_string(),
            user_id,
            departed_rooms,
        })
    }

    /// Add the connection's user to a room.
    ///
    /// `newly_joined` is user-level: false when another connection of the
    /// same user already put them in the room.
    pub fn join_room(&self, conn_id: &str, room_id: &str) -> Option<JoinOutcome> {
        let user_id = {
            let entry = self.connections.get(conn_id)?;
            let mut e = entry.lock();
            e.rooms.insert(room_id.to_string());
            e.user_id.clone()
        };

        let newly_joined = self
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.clone());

        Some(JoinOutcome {
            user_id,
            newly_joined,
        })
    }

    /// Remove the connection's user from a room. Leaving a room not joined
    /// is a no-op.
    pub fn leave_room(&self, conn_id: &str, room_id: &str) -> Option<LeaveOutcome> {
        let (user_id, had_room) = {
            let entry = self.connections.get(conn_id)?;
            let mut e = entry.lock();
            let had = e.rooms.remove(room_id);
            (e.user_id.clone(), had)
        };

        if !had_room {
            return Some(LeaveOutcome {
                user_id,
                was_member: false,
            });
        }

        if self.user_has_room_elsewhere(&user_id, room_id) {
            // Another session keeps the membership alive.
            return Some(LeaveOutcome {
                user_id,
                was_member: false,
            });
        }

        let was_member = self.remove_member(room_id, &user_id);
        Some(LeaveOutcome {
            user_id,
            was_member,
        })
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connection_for(user_id).is_some()
    }

    /// The user's routable connection, if any.
    pub fn connection_for(&self, user_id: &str) -> Option<String> {
        let conn_id = self.user_index.get(user_id).map(|r| r.value().clone())?;
        self.connections.contains_key(&conn_id).then_some(conn_id)
    }

    pub fn connected_users(&self) -> Vec<String> {
        self.user_index
            .iter()
            .filter(|r| self.connections.contains_key(r.value()))
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Current member set of a room. Empty rooms do not exist.
    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, conn_id: &str) -> Vec<String> {
        self.connections
            .get(conn_id)
            .map(|entry| entry.lock().rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn conn_in_room(&self, conn_id: &str, room_id: &str) -> bool {
        self.connections
            .get(conn_id)
            .map(|entry| entry.lock().rooms.contains(room_id))
            .unwrap_or(false)
    }

    /// Membership at the user level: true if any of the user's connections
    /// joined the room.
    pub fn user_in_room(&self, user_id: &str, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false)
    }

    /// Refresh a connection's liveness timestamp.
    pub fn touch_heartbeat(&self, conn_id: &str) {
        if let Some(entry) = self.connections.get(conn_id) {
            entry.lock().last_heartbeat = Instant::now();
        }
    }

    /// Connections whose last heartbeat is older than `timeout`.
    pub fn stale_connections(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        self.connections
            .iter()
            .filter(|r| now.duration_since(r.value().lock().last_heartbeat) > timeout)
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn connection_age(&self, conn_id: &str) -> Option<Duration> {
        self.connections
            .get(conn_id)
            .map(|entry| entry.lock().connected_at.elapsed())
    }

    /// Push an envelope onto a connection's outbound queue. Returns whether
    /// the queue accepted it; a gone connection is a silent miss.
    pub fn send(&self, conn_id: &str, envelope: Envelope) -> bool {
        match self.connections.get(conn_id) {
            Some(entry) => entry.lock().sender.send(envelope).is_ok(),
            None => false,
        }
    }

    /// The user's most recently established live connection, if any.
    fn newest_connection_of(&self, user_id: &str) -> Option<String> {
        self.connections
            .iter()
            .filter_map(|r| {
                let e = r.value().lock();
                (e.user_id == user_id).then(|| (e.connected_at, r.key().clone()))
            })
            .max_by_key(|(connected_at, _)| *connected_at)
            .map(|(_, conn_id)| conn_id)
    }

    /// True if some other live connection of this user has the room joined.
    fn user_has_room_elsewhere(&self, user_id: &str, room_id: &str) -> bool {
        self.connections.iter().any(|r| {
            let e = r.value().lock();
            e.user_id == user_id && e.rooms.contains(room_id)
        })
    }

    /// Remove a user from a room's member set, garbage-collecting the room at
    /// zero membership. Returns whether the user was a member.
    fn remove_member(&self, room_id: &str, user_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut members) => members.remove(user_id),
            None => false,
        };
        self.rooms.remove_if(room_id, |_, members| members.is_empty());
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn channel() -> (UnboundedSender<Envelope>, UnboundedReceiver<Envelope>) {
        mpsc::unbounded_channel()
    }

    fn single_session_registry() -> PresenceRegistry {
        PresenceRegistry::new(false)
    }

    #[test]
    fn register_and_lookup() {
        let reg = single_session_registry();
        let (tx, _rx) = channel();
        let registration = reg.register("c1".to_string(), "u1".to_string(), tx);

        assert!(matches!(registration, Registration::Fresh));
        assert!(reg.is_online("u1"));
        assert_eq!(reg.connection_for("u1").as_deref(), Some("c1"));
        assert_eq!(reg.connected_users(), vec!["u1".to_string()]);
    }

    #[test]
    fn unregister_removes_all_mappings() {
        let reg = single_session_registry();
        let (tx, _rx) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx);
        reg.join_room("c1", "order:42");

        let departure = reg.unregister("c1").unwrap();
        assert_eq!(departure.user_id, "u1");
        assert_eq!(departure.departed_rooms, vec!["order:42".to_string()]);

        assert!(!reg.is_online("u1"));
        assert!(reg.connection_for("u1").is_none());
        assert!(reg.room_members("order:42").is_empty());
    }

    #[test]
    fn unregister_twice_is_a_noop() {
        let reg = single_session_registry();
        let (tx, _rx) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx);

        assert!(reg.unregister("c1").is_some());
        assert!(reg.unregister("c1").is_none());
    }

    #[test]
    fn unregister_cascades_every_joined_room() {
        let reg = single_session_registry();
        let (tx, _rx) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx);
        reg.join_room("c1", "a");
        reg.join_room("c1", "b");

        let departure = reg.unregister("c1").unwrap();
        let mut rooms = departure.departed_rooms;
        rooms.sort();
        assert_eq!(rooms, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn single_session_policy_evicts_previous_connection() {
        let reg = single_session_registry();
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx1);
        reg.join_room("c1", "order:42");

        let registration = reg.register("c2".to_string(), "u1".to_string(), tx2);
        match registration {
            Registration::Evicted { previous } => {
                assert_eq!(previous.conn_id, "c1");
                assert_eq!(previous.departed_rooms, vec!["order:42".to_string()]);
            }
            other => panic!("expected eviction, got {other:?}"),
        }

        // The evicted connection got a "replaced" notice before its queue closed.
        let notice = rx1.try_recv().unwrap();
        match notice.event {
            ServerEvent::ConnectionStatus { status, .. } => assert_eq!(status, "replaced"),
            other => panic!("unexpected event: {other:?}"),
        }

        // At-most-one mapping in both directions.
        assert_eq!(reg.connection_for("u1").as_deref(), Some("c2"));
        assert_eq!(reg.connection_ids(), vec!["c2".to_string()]);
    }

    #[test]
    fn multi_session_policy_keeps_previous_connection_open() {
        let reg = PresenceRegistry::new(true);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx1);
        reg.join_room("c1", "order:42");

        let registration = reg.register("c2".to_string(), "u1".to_string(), tx2);
        assert!(matches!(
            registration,
            Registration::Superseded { ref previous } if previous == "c1"
        ));

        // Old connection still exists with its membership; routing follows
        // the newest connection.
        assert_eq!(reg.connection_for("u1").as_deref(), Some("c2"));
        assert_eq!(reg.room_members("order:42"), vec!["u1".to_string()]);
        assert!(reg.conn_in_room("c1", "order:42"));
    }

    #[test]
    fn multi_session_departure_waits_for_last_connection() {
        let reg = PresenceRegistry::new(true);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx1);
        reg.join_room("c1", "order:42");
        reg.register("c2".to_string(), "u1".to_string(), tx2);
        reg.join_room("c2", "order:42");

        // First connection closes; the other one keeps the membership alive.
        let departure = reg.unregister("c1").unwrap();
        assert!(departure.departed_rooms.is_empty());
        assert_eq!(reg.room_members("order:42"), vec!["u1".to_string()]);

        // Last connection closes; now the room is departed.
        let departure = reg.unregister("c2").unwrap();
        assert_eq!(departure.departed_rooms, vec!["order:42".to_string()]);
        assert!(reg.room_members("order:42").is_empty());
    }

    #[test]
    fn multi_session_routing_survives_newest_close() {
        let reg = PresenceRegistry::new(true);
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = channel();
        let (tx3, _rx3) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx1);
        reg.register("c2".to_string(), "u1".to_string(), tx2);
        reg.register("c3".to_string(), "u1".to_string(), tx3);
        reg.join_room("c1", "order:42");

        // The newest connection closes; routing falls back to the newest
        // survivor and the user stays online and a room member.
        reg.unregister("c3").unwrap();
        assert!(reg.is_online("u1"));
        assert_eq!(reg.connection_for("u1").as_deref(), Some("c2"));
        assert!(reg.user_in_room("u1", "order:42"));

        reg.unregister("c2").unwrap();
        assert_eq!(reg.connection_for("u1").as_deref(), Some("c1"));
        assert!(reg.send("c1", Envelope::stamp(ServerEvent::Ping)));
        assert!(rx1.try_recv().is_ok());

        reg.unregister("c1").unwrap();
        assert!(!reg.is_online("u1"));
        assert!(reg.connection_for("u1").is_none());
    }

    #[test]
    fn join_is_idempotent_at_user_level() {
        let reg = single_session_registry();
        let (tx, _rx) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx);

        let first = reg.join_room("c1", "r1").unwrap();
        assert!(first.newly_joined);

        let second = reg.join_room("c1", "r1").unwrap();
        assert!(!second.newly_joined);
        assert_eq!(reg.room_members("r1"), vec!["u1".to_string()]);
    }

    #[test]
    fn leave_room_not_joined_is_a_noop() {
        let reg = single_session_registry();
        let (tx, _rx) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx);

        let outcome = reg.leave_room("c1", "r1").unwrap();
        assert!(!outcome.was_member);
    }

    #[test]
    fn empty_rooms_are_garbage_collected() {
        let reg = single_session_registry();
        let (tx, _rx) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx);
        reg.join_room("c1", "r1");
        reg.leave_room("c1", "r1");

        assert!(reg.rooms.get("r1").is_none());
    }

    #[test]
    fn stale_connections_honor_timeout() {
        let reg = single_session_registry();
        let (tx, _rx) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx);

        // Generous timeout: nothing is stale.
        assert!(reg
            .stale_connections(Duration::from_secs(3600))
            .is_empty());

        // Zero timeout: everything older than "right now" is stale.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(reg.stale_connections(Duration::ZERO), vec!["c1".to_string()]);

        // A heartbeat refresh rescues the connection.
        reg.touch_heartbeat("c1");
        assert!(reg.stale_connections(Duration::from_millis(2)).is_empty());
    }

    #[test]
    fn send_to_gone_connection_is_a_silent_miss() {
        let reg = single_session_registry();
        assert!(!reg.send("nope", Envelope::stamp(ServerEvent::Ping)));
    }

    #[test]
    fn send_delivers_to_the_outbound_queue() {
        let reg = single_session_registry();
        let (tx, mut rx) = channel();
        reg.register("c1".to_string(), "u1".to_string(), tx);

        assert!(reg.send("c1", Envelope::stamp(ServerEvent::Ping)));
        let envelope = rx.try_recv().unwrap();
        assert!(matches!(envelope.event, ServerEvent::Ping));
    }
}
