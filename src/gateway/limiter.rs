//! Fixed-window rate limiting of new connection attempts per origin.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct FixedWindow {
    count: u32,
    resets_at: Instant,
}

/// Caps new-connection attempts per network origin within a fixed window.
///
/// Windows reset lazily on the first check past their reset time; the
/// periodic sweep only bounds memory for origins that went quiet.
/// Established connections are never affected.
pub struct ConnectionRateLimiter {
    windows: DashMap<String, FixedWindow>,
    limit: u32,
    window: Duration,
}

impl ConnectionRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    /// Record a connection attempt from `origin`. Returns whether the
    /// attempt is allowed.
    pub fn check_and_increment(&self, origin: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(origin.to_string())
            .or_insert_with(|| FixedWindow {
                count: 0,
                resets_at: now + self.window,
            });

        if now >= entry.resets_at {
            entry.count = 0;
            entry.resets_at = now + self.window;
        }

        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Remove windows whose reset time has passed. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.resets_at > now);
        before - self.windows.len()
    }
}
