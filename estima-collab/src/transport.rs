//! Publish/subscribe transport abstraction.
//!
//! A transport is a best-effort broadcast bus: every publish is delivered at
//! most once, in no particular order, to every current subscriber of the
//! topic, including the publisher itself. Nothing is stored for peers that
//! are not subscribed at publish time.
//!
//! All methods are non-blocking. Status changes and inbound messages are
//! delivered as [`TransportEvent`]s on the channel handed to
//! [`Transport::connect`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Connection status reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Offline,
    /// Terminal: the transport gave up
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Status(ConnectionStatus),
    Message { topic: String, payload: Vec<u8> },
}

/// Sending half of the event channel a transport reports into.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Broadcast publish/subscribe capability.
pub trait Transport: Send + 'static {
    /// Begin connecting. Status transitions and messages go to `events`.
    fn connect(&mut self, events: EventSender);

    /// Subscribe to a topic. Ignored while not connected.
    fn subscribe(&mut self, topic: &str);

    /// Publish to a topic. Dropped while not connected.
    fn publish(&mut self, topic: &str, payload: Vec<u8>);

    /// Tear the connection down. Publishes after this are dropped.
    fn disconnect(&mut self);
}

// ───────────────────────────────────────────────────────────────────
// In-memory relay
// ───────────────────────────────────────────────────────────────────

struct Connection {
    events: Option<EventSender>,
    topics: HashSet<String>,
    offline: bool,
}

#[derive(Default)]
struct RelayState {
    next_id: u64,
    connections: HashMap<u64, Connection>,
    published: Vec<(String, Vec<u8>)>,
    delivered: u64,
}

/// In-process broadcast relay with the same delivery semantics as the
/// WebSocket relay. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a transport attached to this relay.
    pub fn transport(&self) -> MemoryTransport {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.connections.insert(
            id,
            Connection {
                events: None,
                topics: HashSet::new(),
                offline: false,
            },
        );
        MemoryTransport {
            relay: self.clone(),
            id,
        }
    }

    /// Cut a transport off the relay (or restore it).
    ///
    /// An offline transport neither sends nor receives, and observes
    /// `Offline` / `Connected` status transitions. Its subscriptions are
    /// forgotten, as with a real dropped connection.
    pub fn set_offline(&self, transport_id: u64, offline: bool) {
        let mut state = self.lock();
        if let Some(conn) = state.connections.get_mut(&transport_id) {
            if conn.offline == offline {
                return;
            }
            conn.offline = offline;
            conn.topics.clear();
            if let Some(events) = &conn.events {
                let status = if offline {
                    ConnectionStatus::Offline
                } else {
                    ConnectionStatus::Connected
                };
                let _ = events.send(TransportEvent::Status(status));
            }
        }
    }

    /// Every publish accepted by the relay, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().published.clone()
    }

    /// Number of publishes accepted on `topic`.
    pub fn publish_count(&self, topic: &str) -> usize {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    /// Total number of messages handed to subscribers.
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    /// Forget the publish log.
    pub fn clear_log(&self) {
        self.lock().published.clear();
    }

    /// Number of connected (online) transports.
    pub fn connection_count(&self) -> usize {
        self.lock()
            .connections
            .values()
            .filter(|c| c.events.is_some() && !c.offline)
            .count()
    }

    fn publish(&self, from: u64, topic: &str, payload: Vec<u8>) {
        let mut state = self.lock();
        let online = state
            .connections
            .get(&from)
            .is_some_and(|c| c.events.is_some() && !c.offline);
        if !online {
            log::trace!("memory relay: dropping publish from offline transport {from}");
            return;
        }

        let mut delivered = 0;
        for conn in state.connections.values() {
            if conn.offline || !conn.topics.contains(topic) {
                continue;
            }
            if let Some(events) = &conn.events {
                let event = TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                };
                if events.send(event).is_ok() {
                    delivered += 1;
                }
            }
        }
        state.delivered += delivered;
        state.published.push((topic.to_string(), payload));
    }
}

/// A transport attached to a [`MemoryRelay`].
pub struct MemoryTransport {
    relay: MemoryRelay,
    id: u64,
}

impl MemoryTransport {
    /// Relay-local id, usable with [`MemoryRelay::set_offline`].
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, events: EventSender) {
        let mut state = self.relay.lock();
        if let Some(conn) = state.connections.get_mut(&self.id) {
            let _ = events.send(TransportEvent::Status(ConnectionStatus::Connecting));
            if !conn.offline {
                let _ = events.send(TransportEvent::Status(ConnectionStatus::Connected));
            }
            conn.events = Some(events);
        }
    }

    fn subscribe(&mut self, topic: &str) {
        let mut state = self.relay.lock();
        if let Some(conn) = state.connections.get_mut(&self.id) {
            if conn.events.is_some() && !conn.offline {
                conn.topics.insert(topic.to_string());
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) {
        self.relay.publish(self.id, topic, payload);
    }

    fn disconnect(&mut self) {
        let mut state = self.relay.lock();
        if let Some(conn) = state.connections.get_mut(&self.id) {
            conn.topics.clear();
            conn.events = None;
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.relay.lock().connections.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn connected(relay: &MemoryRelay) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let mut transport = relay.transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx);
        assert_eq!(
            drain(&mut rx),
            vec![
                TransportEvent::Status(ConnectionStatus::Connecting),
                TransportEvent::Status(ConnectionStatus::Connected),
            ]
        );
        (transport, rx)
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_publish_reaches_all_subscribers_including_sender() {
        let relay = MemoryRelay::new();
        let (mut a, mut rx_a) = connected(&relay);
        let (mut b, mut rx_b) = connected(&relay);
        a.subscribe("room/update");
        b.subscribe("room/update");

        a.publish("room/update", vec![1, 2, 3]);

        let expected = vec![TransportEvent::Message {
            topic: "room/update".into(),
            payload: vec![1, 2, 3],
        }];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
        assert_eq!(relay.delivered(), 2);
    }

    #[test]
    fn test_publish_without_subscribers_is_lost() {
        let relay = MemoryRelay::new();
        let (mut a, mut rx_a) = connected(&relay);
        a.publish("room/update", vec![9]);

        let (mut b, mut rx_b) = connected(&relay);
        b.subscribe("room/update");

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(relay.publish_count("room/update"), 1);
        assert_eq!(relay.delivered(), 0);
    }

    #[test]
    fn test_topics_are_isolated() {
        let relay = MemoryRelay::new();
        let (mut a, _rx_a) = connected(&relay);
        let (mut b, mut rx_b) = connected(&relay);
        b.subscribe("other/update");

        a.publish("room/update", vec![1]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_offline_transport_is_cut_off() {
        let relay = MemoryRelay::new();
        let (mut a, mut rx_a) = connected(&relay);
        let (mut b, mut rx_b) = connected(&relay);
        a.subscribe("t");
        b.subscribe("t");

        relay.set_offline(b.id(), true);
        assert_eq!(
            drain(&mut rx_b),
            vec![TransportEvent::Status(ConnectionStatus::Offline)]
        );

        b.publish("t", vec![1]);
        a.publish("t", vec![2]);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(relay.connection_count(), 1);

        relay.set_offline(b.id(), false);
        assert_eq!(
            drain(&mut rx_b),
            vec![TransportEvent::Status(ConnectionStatus::Connected)]
        );
        // Subscriptions do not survive the outage.
        a.publish("t", vec![3]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let relay = MemoryRelay::new();
        let (mut a, mut rx_a) = connected(&relay);
        a.subscribe("t");
        a.disconnect();

        a.publish("t", vec![1]);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(relay.connection_count(), 0);
    }

    #[test]
    fn test_drop_detaches() {
        let relay = MemoryRelay::new();
        {
            let (_a, _rx) = connected(&relay);
            assert_eq!(relay.connection_count(), 1);
        }
        assert_eq!(relay.connection_count(), 0);
    }
}
