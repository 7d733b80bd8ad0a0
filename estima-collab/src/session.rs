//! Synchronous room orchestrator.
//!
//! `RoomSession` owns the replicated document, the sync provider and the
//! presence tracker. It has no timers and no task of its own: whoever owns
//! it feeds it transport events and clock ticks. [`crate::room::Room`] does
//! that on a tokio task; tests do it by hand for deterministic runs.
//!
//! ```text
//!  command ──► transact ──► flush deltas ──► notify listeners
//!
//!  transport event ──► SyncProvider ──┬─ RemoteChange ──► notify (if changed)
//!                                     ├─ Heartbeat    ──► PresenceTracker
//!                                     ├─ Leave        ──► evict
//!                                     └─ Status       ──► notify status
//!
//!  heartbeat_tick ──► publish heartbeat
//!  sweep          ──► evict stale peers
//! ```

use tokio::time::Instant;

use crate::document::{DocTransaction, ReplicatedDocument, Store};
use crate::notify::{Listeners, Subscription};
use crate::presence::{PresenceConfig, PresenceTracker};
use crate::protocol::{RoomTopics, DEFAULT_NAMESPACE};
use crate::provider::{ProviderStats, SyncProvider, SyncSignal};
use crate::snapshot::{Participant, Phase, RoomSnapshot, ISSUE_KEY, PHASE_KEY};
use crate::transport::{ConnectionStatus, Transport, TransportEvent};

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Topic namespace shared by every replica of the application
    pub namespace: String,
    pub presence: PresenceConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            presence: PresenceConfig::default(),
        }
    }
}

/// One replica's membership in a room.
pub struct RoomSession {
    room_id: String,
    me: Participant,
    doc: ReplicatedDocument,
    provider: SyncProvider,
    presence: PresenceTracker,
    listeners: Listeners<RoomSnapshot>,
    status_listeners: Listeners<ConnectionStatus>,
    last_snapshot: RoomSnapshot,
    destroyed: bool,
}

impl RoomSession {
    /// Join a room now.
    pub fn join(
        config: RoomConfig,
        room_id: impl Into<String>,
        me: Participant,
        transport: impl Transport,
    ) -> Self {
        Self::join_at(config, room_id, me, transport, Instant::now())
    }

    /// Join a room, with the join instant given explicitly.
    ///
    /// Registers the local participant, seeds presence and starts the
    /// transport. Phase and issue are not written: absent keys read as their
    /// defaults, so a late joiner never overrides the room's values.
    pub fn join_at(
        config: RoomConfig,
        room_id: impl Into<String>,
        me: Participant,
        transport: impl Transport,
        now: Instant,
    ) -> Self {
        let room_id = room_id.into();
        let topics = RoomTopics::new(&config.namespace, &room_id);

        let mut doc = ReplicatedDocument::new();
        if !doc.has(Store::Roster, &me.id) {
            doc.set(Store::Roster, &me.id, me.name.clone());
        }

        let provider = SyncProvider::new(topics, me.id.clone(), Box::new(transport));
        let presence = PresenceTracker::new(me.id.clone(), now, config.presence);
        let last_snapshot = RoomSnapshot::from_document(&doc, &me.id);

        let mut session = Self {
            room_id,
            me,
            doc,
            provider,
            presence,
            listeners: Listeners::new(),
            status_listeners: Listeners::new(),
            last_snapshot,
            destroyed: false,
        };
        log::info!(
            "{} ({}) joining room {}",
            session.me.name,
            session.me.id,
            session.room_id
        );

        // The registration goes out with our own answer to our sync-request.
        session.provider.connect();
        session.provider.flush_local_changes(&mut session.doc);
        session
    }

    // ─── Commands ────────────────────────────────────────────────

    /// Cast or overwrite the local vote.
    pub fn vote(&mut self, value: &str) {
        self.commit("vote", |txn, me| txn.set(Store::Votes, me, value));
    }

    /// Withdraw the local vote.
    pub fn clear_vote(&mut self) {
        self.commit("clear_vote", |txn, me| {
            txn.delete(Store::Votes, me);
        });
    }

    /// Vote `value`, or withdraw the vote if it already is `value`.
    pub fn toggle_vote(&mut self, value: &str) {
        if self.doc.get(Store::Votes, &self.me.id).as_deref() == Some(value) {
            self.clear_vote();
        } else {
            self.vote(value);
        }
    }

    /// Make votes visible to everyone.
    pub fn reveal(&mut self) {
        self.commit("reveal", |txn, _| {
            txn.set(Store::Meta, PHASE_KEY, Phase::Revealed.as_str())
        });
    }

    /// Start a new round: all votes cleared and phase back to voting, atomically.
    pub fn reset(&mut self) {
        self.commit("reset", |txn, _| {
            txn.clear(Store::Votes);
            txn.set(Store::Meta, PHASE_KEY, Phase::Voting.as_str());
        });
    }

    pub fn set_issue(&mut self, issue: &str) {
        self.commit("set_issue", |txn, _| txn.set(Store::Meta, ISSUE_KEY, issue));
    }

    fn commit(&mut self, command: &str, f: impl FnOnce(&mut DocTransaction<'_>, &str)) {
        if self.destroyed {
            log::debug!("Ignoring {command} on destroyed room {}", self.room_id);
            return;
        }
        log::debug!("{} in room {}", command, self.room_id);
        let me = self.me.id.clone();
        self.doc.transact(|txn| f(txn, &me));
        self.provider.flush_local_changes(&mut self.doc);
        self.publish_snapshot();
    }

    // ─── Reads & subscriptions ───────────────────────────────────

    /// Current materialized state.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot::from_document(&self.doc, &self.me.id)
    }

    /// Listen for snapshots after every committed change.
    pub fn subscribe(&self, listener: impl FnMut(&RoomSnapshot) + Send + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Listen for connection status transitions.
    pub fn subscribe_status(
        &self,
        listener: impl FnMut(&ConnectionStatus) + Send + 'static,
    ) -> Subscription {
        self.status_listeners.subscribe(listener)
    }

    /// Shared snapshot listener set.
    pub fn listeners(&self) -> Listeners<RoomSnapshot> {
        self.listeners.clone()
    }

    /// Shared status listener set.
    pub fn status_listeners(&self) -> Listeners<ConnectionStatus> {
        self.status_listeners.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.provider.status()
    }

    pub fn my_id(&self) -> &str {
        &self.me.id
    }

    pub fn me(&self) -> &Participant {
        &self.me
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn provider_stats(&self) -> &ProviderStats {
        self.provider.stats()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    // ─── Event handling ──────────────────────────────────────────

    /// Handle every transport event already queued. Returns how many.
    pub fn pump(&mut self) -> usize {
        self.pump_at(Instant::now())
    }

    pub fn pump_at(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Some(event) = self.provider.try_next_event() {
            self.handle_transport_event(event, now);
            handled += 1;
        }
        handled
    }

    /// Wait for the next transport event. `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.provider.next_event().await
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        if self.destroyed {
            return;
        }
        match self.provider.handle_event(&mut self.doc, event) {
            SyncSignal::None => {}
            SyncSignal::Status(status) => self.status_listeners.notify(&status),
            SyncSignal::RemoteChange => self.on_remote_change(),
            SyncSignal::Heartbeat(peer) => self.presence.record_heartbeat(&peer, now),
            SyncSignal::Leave(peer) => {
                if let Some(peer) = self.presence.handle_leave(&peer) {
                    log::info!("{peer} left room {}", self.room_id);
                    self.evict(&[peer]);
                }
            }
        }
    }

    /// Announce ourselves. Called every heartbeat interval.
    pub fn heartbeat_tick(&mut self, now: Instant) {
        if self.destroyed {
            return;
        }
        self.presence.touch_local(now);
        self.provider.publish_heartbeat();
    }

    /// Evict stale roster members. Returns the evicted peer ids.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        if self.destroyed {
            return Vec::new();
        }
        let roster = self.doc.keys(Store::Roster);
        let stale = self
            .presence
            .stale_peers(roster.iter().map(String::as_str), now);
        let pruned = self
            .presence
            .prune(roster.iter().map(String::as_str), now);
        if pruned > 0 {
            log::debug!("Pruned {pruned} departed peers from the liveness table");
        }
        if !stale.is_empty() {
            log::info!("Evicting stale peers {stale:?} from room {}", self.room_id);
            self.evict(&stale);
        }
        stale
    }

    fn evict(&mut self, peers: &[String]) {
        for peer in peers {
            self.presence.forget(peer);
        }
        self.doc.transact(|txn| {
            for peer in peers {
                txn.delete(Store::Roster, peer);
                txn.delete(Store::Votes, peer);
            }
        });
        self.provider.flush_local_changes(&mut self.doc);
        self.notify_if_changed();
    }

    fn on_remote_change(&mut self) {
        if !self.doc.has(Store::Roster, &self.me.id) {
            log::warn!(
                "{} was removed from room {} by a peer, re-registering",
                self.me.id,
                self.room_id
            );
            self.doc.set(Store::Roster, &self.me.id, self.me.name.clone());
            self.provider.flush_local_changes(&mut self.doc);
        }
        self.notify_if_changed();
    }

    fn notify_if_changed(&mut self) {
        let snapshot = self.snapshot();
        if snapshot != self.last_snapshot {
            self.last_snapshot = snapshot;
            self.listeners.notify(&self.last_snapshot);
        }
    }

    fn publish_snapshot(&mut self) {
        self.last_snapshot = self.snapshot();
        self.listeners.notify(&self.last_snapshot);
    }

    // ─── Teardown ────────────────────────────────────────────────

    /// Leave the room. Idempotent.
    ///
    /// Publishes our leave, removes us from the roster, tears down the
    /// transport and drops every listener.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        log::info!("{} leaving room {}", self.me.id, self.room_id);

        self.provider.publish_leave();
        let me = self.me.id.clone();
        self.doc.transact(|txn| {
            txn.delete(Store::Roster, &me);
        });
        self.provider.flush_local_changes(&mut self.doc);
        self.destroyed = true;
        self.publish_snapshot();

        self.provider.disconnect();
        self.listeners.clear();
        self.status_listeners.clear();
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.destroy();
    }
}
