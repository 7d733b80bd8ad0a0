//! Bridges a [`ReplicatedDocument`] and a [`Transport`].
//!
//! ```text
//!   local transaction ──► take_local_changes ──► publish(update)
//!
//!   update / sync-response ──► apply_delta(Remote)      (never re-published)
//!   sync-request           ──► publish(sync-response, full state)
//!   heartbeat / leave      ──► SyncSignal for the presence tracker
//! ```
//!
//! Every transition into `Connected` (first connect and every reconnect)
//! subscribes to the room channels and asks the room for its full state, so
//! a replica catches up on whatever it missed while away.

use tokio::sync::mpsc;

use crate::document::{Origin, ReplicatedDocument};
use crate::protocol::{Channel, RoomTopics};
use crate::transport::{ConnectionStatus, Transport, TransportEvent};

/// What a handled transport event means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    /// Nothing the session needs to react to
    None,
    Status(ConnectionStatus),
    /// A remote delta was applied to the document
    RemoteChange,
    Heartbeat(String),
    Leave(String),
}

/// Provider counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub updates_published: u64,
    /// Local deltas produced while not connected
    pub updates_dropped: u64,
    pub sync_requests_sent: u64,
    pub sync_responses_sent: u64,
    pub remote_deltas_applied: u64,
    pub malformed_deltas: u64,
}

/// Synchronization provider for one room.
pub struct SyncProvider {
    topics: RoomTopics,
    local_peer: String,
    transport: Box<dyn Transport>,
    status: ConnectionStatus,
    events_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    stats: ProviderStats,
}

impl SyncProvider {
    pub fn new(topics: RoomTopics, local_peer: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            topics,
            local_peer: local_peer.into(),
            transport,
            status: ConnectionStatus::Disconnected,
            events_tx: Some(events_tx),
            events_rx,
            stats: ProviderStats::default(),
        }
    }

    /// Start the transport. Only the first call has an effect.
    pub fn connect(&mut self) {
        if let Some(events) = self.events_tx.take() {
            self.transport.connect(events);
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn topics(&self) -> &RoomTopics {
        &self.topics
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    /// Next queued transport event, without waiting.
    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Wait for the next transport event. `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.recv().await
    }

    /// Process one transport event against the document.
    pub fn handle_event(&mut self, doc: &mut ReplicatedDocument, event: TransportEvent) -> SyncSignal {
        match event {
            TransportEvent::Status(status) => {
                if status == self.status {
                    return SyncSignal::None;
                }
                log::info!("{} connection {} -> {status}", self.local_peer, self.status);
                self.status = status;
                if status == ConnectionStatus::Connected {
                    self.on_connected();
                }
                SyncSignal::Status(status)
            }
            TransportEvent::Message { topic, payload } => {
                let Some(channel) = self.topics.channel_of(&topic) else {
                    log::trace!("Ignoring message on foreign topic {topic}");
                    return SyncSignal::None;
                };
                match channel {
                    Channel::Update | Channel::SyncResponse => self.apply_remote(doc, &payload),
                    Channel::SyncRequest => {
                        let state = doc.encode_full_state();
                        if self.publish(Channel::SyncResponse, state) {
                            self.stats.sync_responses_sent += 1;
                        }
                        SyncSignal::None
                    }
                    Channel::Heartbeat => match peer_id(payload) {
                        Some(peer) => SyncSignal::Heartbeat(peer),
                        None => SyncSignal::None,
                    },
                    Channel::Leave => match peer_id(payload) {
                        Some(peer) => SyncSignal::Leave(peer),
                        None => SyncSignal::None,
                    },
                }
            }
        }
    }

    /// Publish every queued local delta, or drop them when not connected.
    pub fn flush_local_changes(&mut self, doc: &mut ReplicatedDocument) {
        for delta in doc.take_local_changes() {
            if self.publish(Channel::Update, delta) {
                self.stats.updates_published += 1;
            } else {
                self.stats.updates_dropped += 1;
            }
        }
    }

    pub fn publish_heartbeat(&mut self) {
        let payload = self.local_peer.as_bytes().to_vec();
        self.publish(Channel::Heartbeat, payload);
    }

    pub fn publish_leave(&mut self) {
        let payload = self.local_peer.as_bytes().to_vec();
        self.publish(Channel::Leave, payload);
    }

    /// Tear the transport down.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        self.status = ConnectionStatus::Disconnected;
    }

    fn on_connected(&mut self) {
        for topic in self.topics.all() {
            self.transport.subscribe(&topic);
        }
        if self.publish(Channel::SyncRequest, Vec::new()) {
            self.stats.sync_requests_sent += 1;
        }
        self.publish_heartbeat();
    }

    fn apply_remote(&mut self, doc: &mut ReplicatedDocument, payload: &[u8]) -> SyncSignal {
        match doc.apply_delta(payload, Origin::Remote) {
            Ok(()) => {
                self.stats.remote_deltas_applied += 1;
                SyncSignal::RemoteChange
            }
            Err(e) => {
                log::warn!("Dropping malformed delta ({} bytes): {e}", payload.len());
                self.stats.malformed_deltas += 1;
                SyncSignal::None
            }
        }
    }

    fn publish(&mut self, channel: Channel, payload: Vec<u8>) -> bool {
        if !self.is_connected() {
            log::trace!("Not connected, dropping {} publish", channel.as_str());
            return false;
        }
        log::debug!("Publishing {} ({} bytes)", channel.as_str(), payload.len());
        self.transport.publish(&self.topics.topic(channel), payload);
        true
    }
}

fn peer_id(payload: Vec<u8>) -> Option<String> {
    match String::from_utf8(payload) {
        Ok(id) if !id.is_empty() => Some(id),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Ignoring presence signal with non-UTF-8 peer id: {e}");
            None
        }
    }
}
