//! Liveness bookkeeping for room participants.
//!
//! The roster is replicated; liveness is not. Each replica keeps its own
//! last-seen table fed by heartbeats, and evicts roster members it has not
//! heard from in a while:
//!
//! ```text
//!  join ──┬── every 5s: publish heartbeat, touch self
//!         │
//!         └── every 5s: sweep
//!                 │  (no-op for the first 20s after join)
//!                 ▼
//!             roster member with last_seen older than 15s,
//!             or never seen at all ──► evict
//! ```
//!
//! The grace period gives a late joiner time to hear from everyone already
//! in the room before it starts judging them.
//!
//! Reference: Kleppmann, Chapter 8, Timeouts and Unbounded Delays

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// How often a replica announces itself.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Silence after which a peer counts as gone.
pub const PRESENCE_TIMEOUT: Duration = Duration::from_secs(15);
/// Time after joining during which nobody is evicted.
pub const JOIN_GRACE_PERIOD: Duration = Duration::from_secs(20);

/// Presence timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Period of both the heartbeat and the sweep
    pub heartbeat_interval: Duration,
    pub presence_timeout: Duration,
    pub join_grace_period: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            presence_timeout: PRESENCE_TIMEOUT,
            join_grace_period: JOIN_GRACE_PERIOD,
        }
    }
}

/// Local last-seen table.
#[derive(Debug)]
pub struct PresenceTracker {
    local_peer: String,
    joined_at: Instant,
    last_seen: HashMap<String, Instant>,
    config: PresenceConfig,
}

impl PresenceTracker {
    /// Start tracking, with the local peer seen at `now`.
    pub fn new(local_peer: impl Into<String>, now: Instant, config: PresenceConfig) -> Self {
        let local_peer = local_peer.into();
        let mut last_seen = HashMap::new();
        last_seen.insert(local_peer.clone(), now);
        Self {
            local_peer,
            joined_at: now,
            last_seen,
            config,
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn local_peer(&self) -> &str {
        &self.local_peer
    }

    /// Refresh the local entry (called on every heartbeat tick).
    pub fn touch_local(&mut self, now: Instant) {
        self.last_seen.insert(self.local_peer.clone(), now);
    }

    /// A heartbeat from `peer` arrived.
    pub fn record_heartbeat(&mut self, peer: &str, now: Instant) {
        log::trace!("Heartbeat from {peer}");
        self.last_seen.insert(peer.to_string(), now);
    }

    /// A leave from `peer` arrived. Returns the peer to evict, unless it is
    /// the echo of our own leave.
    pub fn handle_leave(&mut self, peer: &str) -> Option<String> {
        if peer == self.local_peer {
            return None;
        }
        self.last_seen.remove(peer);
        Some(peer.to_string())
    }

    /// Drop a peer from the table.
    pub fn forget(&mut self, peer: &str) {
        self.last_seen.remove(peer);
    }

    /// Whether sweeps are still suppressed.
    pub fn in_grace_period(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.joined_at) < self.config.join_grace_period
    }

    pub fn last_seen(&self, peer: &str) -> Option<Instant> {
        self.last_seen.get(peer).copied()
    }

    /// Number of peers in the table, self included.
    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }

    /// Drop entries for peers outside `roster` that have been silent longer
    /// than the presence timeout. Returns how many were dropped.
    ///
    /// Covers peers removed by another replica and peers that only ever
    /// sent heartbeats.
    pub fn prune<'a>(&mut self, roster: impl IntoIterator<Item = &'a str>, now: Instant) -> usize {
        let roster: HashSet<&str> = roster.into_iter().collect();
        let before = self.last_seen.len();
        let local = &self.local_peer;
        let timeout = self.config.presence_timeout;
        self.last_seen.retain(|peer, seen| {
            peer == local
                || roster.contains(peer.as_str())
                || now.saturating_duration_since(*seen) <= timeout
        });
        before - self.last_seen.len()
    }

    /// Roster members that should be evicted at `now`.
    ///
    /// Never includes the local peer. Peers that were never heard from count
    /// as stale. Empty during the grace period.
    pub fn stale_peers<'a>(&self, roster: impl IntoIterator<Item = &'a str>, now: Instant) -> Vec<String> {
        if self.in_grace_period(now) {
            return Vec::new();
        }
        roster
            .into_iter()
            .filter(|id| *id != self.local_peer)
            .filter(|id| match self.last_seen.get(*id) {
                Some(seen) => now.saturating_duration_since(*seen) > self.config.presence_timeout,
                None => true,
            })
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_default_config() {
        let config = PresenceConfig::default();
        assert_eq!(config.heartbeat_interval, secs(5));
        assert_eq!(config.presence_timeout, secs(15));
        assert_eq!(config.join_grace_period, secs(20));
    }

    #[test]
    fn test_self_seeded_at_join() {
        let t0 = Instant::now();
        let tracker = PresenceTracker::new("me", t0, PresenceConfig::default());
        assert_eq!(tracker.last_seen("me"), Some(t0));
        assert_eq!(tracker.tracked(), 1);
        assert_eq!(tracker.local_peer(), "me");
    }

    #[test]
    fn test_nothing_stale_during_grace() {
        let t0 = Instant::now();
        let tracker = PresenceTracker::new("me", t0, PresenceConfig::default());

        assert!(tracker.in_grace_period(t0 + secs(19)));
        assert!(tracker.stale_peers(["me", "ghost"], t0 + secs(19)).is_empty());
    }

    #[test]
    fn test_never_seen_peer_is_stale_after_grace() {
        let t0 = Instant::now();
        let tracker = PresenceTracker::new("me", t0, PresenceConfig::default());

        assert!(!tracker.in_grace_period(t0 + secs(20)));
        assert_eq!(tracker.stale_peers(["me", "ghost"], t0 + secs(20)), vec!["ghost"]);
    }

    #[test]
    fn test_prune_drops_silent_peers_outside_roster() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new("me", t0, PresenceConfig::default());
        tracker.record_heartbeat("gone", t0 + secs(1));
        tracker.record_heartbeat("fresh", t0 + secs(20));
        tracker.record_heartbeat("member", t0 + secs(1));

        // "member" is still on the roster and is left to the sweep
        let dropped = tracker.prune(["me", "member"], t0 + secs(25));

        assert_eq!(dropped, 1);
        assert_eq!(tracker.last_seen("gone"), None);
        assert_eq!(tracker.last_seen("fresh"), Some(t0 + secs(20)));
        assert_eq!(tracker.last_seen("member"), Some(t0 + secs(1)));
        assert_eq!(tracker.last_seen("me"), Some(t0));
        assert_eq!(tracker.tracked(), 3);
    }

    #[test]
    fn test_timeout_boundary() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new("me", t0, PresenceConfig::default());
        tracker.record_heartbeat("bob", t0 + secs(10));

        // Exactly at the timeout is still alive
        assert!(tracker.stale_peers(["bob"], t0 + secs(25)).is_empty());
        assert_eq!(tracker.stale_peers(["bob"], t0 + secs(26)), vec!["bob"]);
    }

    #[test]
    fn test_heartbeat_keeps_peer_alive() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new("me", t0, PresenceConfig::default());
        for s in (0..60).step_by(5) {
            tracker.record_heartbeat("bob", t0 + secs(s));
            tracker.touch_local(t0 + secs(s));
        }
        assert!(tracker.stale_peers(["me", "bob"], t0 + secs(60)).is_empty());
    }

    #[test]
    fn test_self_never_stale() {
        let t0 = Instant::now();
        let tracker = PresenceTracker::new("me", t0, PresenceConfig::default());
        assert!(tracker.stale_peers(["me"], t0 + secs(3600)).is_empty());
    }

    #[test]
    fn test_leave_handling() {
        let t0 = Instant::now();
        let mut tracker = PresenceTracker::new("me", t0, PresenceConfig::default());
        tracker.record_heartbeat("bob", t0);

        assert_eq!(tracker.handle_leave("me"), None);
        assert_eq!(tracker.handle_leave("bob"), Some("bob".to_string()));
        assert_eq!(tracker.last_seen("bob"), None);
        assert!(tracker.last_seen("me").is_some());
    }

    #[test]
    fn test_custom_config() {
        let t0 = Instant::now();
        let config = PresenceConfig {
            heartbeat_interval: Duration::from_millis(100),
            presence_timeout: Duration::from_millis(300),
            join_grace_period: Duration::ZERO,
        };
        let mut tracker = PresenceTracker::new("me", t0, config);
        tracker.record_heartbeat("bob", t0);
        tracker.forget("carol");

        assert!(!tracker.in_grace_period(t0));
        assert_eq!(
            tracker.stale_peers(["bob"], t0 + Duration::from_millis(301)),
            vec!["bob"]
        );
    }
}
