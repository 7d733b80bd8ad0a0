//! Topic fan-out for the relay server.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers of a
//! topic. Each subscriber gets an independent receiver that buffers up to
//! `capacity` frames; a subscriber that lags further behind loses frames,
//! which the room protocol tolerates (at-most-once delivery).
//!
//! Reference: Patterson & Hennessy, Section 6.4, Interconnection Networks

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Statistics for monitoring topic health.
#[derive(Debug, Clone, Default)]
pub struct TopicStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub subscribers: usize,
}

/// Fan-out group for a single topic.
///
/// Frames are pre-encoded once and shared between receivers.
pub struct TopicGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    subscribers: AtomicUsize,
    capacity: usize,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl TopicGroup {
    /// Create a new group with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscribers: AtomicUsize::new(0),
            capacity,
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscriber and return its receiver.
    ///
    /// Pair every call with [`TopicGroup::remove_subscriber`].
    pub fn add_subscriber(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        self.sender.subscribe()
    }

    /// Unregister a subscriber.
    pub fn remove_subscriber(&self) {
        let _ = self
            .subscribers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Fan out a pre-encoded frame. Returns the number of receivers reached.
    ///
    /// With no receivers the frame is dropped: nothing is stored for later.
    pub fn publish(&self, encoded: Arc<Vec<u8>>) -> usize {
        match self.sender.send(encoded) {
            Ok(count) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                count
            }
            Err(_) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Record frames a lagging receiver skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.frames_dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Lock-free stats snapshot.
    pub fn stats(&self) -> TopicStats {
        TopicStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps topic names to fan-out groups.
pub struct TopicManager {
    topics: Arc<RwLock<HashMap<String, Arc<TopicGroup>>>>,
    default_capacity: usize,
}

impl TopicManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    /// Register a subscriber on a topic, creating its group if needed.
    ///
    /// The count is raised under the map's write lock, so a concurrent
    /// [`TopicManager::release`] can never remove the group in between.
    pub async fn subscribe(
        &self,
        topic: &str,
    ) -> (Arc<TopicGroup>, broadcast::Receiver<Arc<Vec<u8>>>) {
        let mut topics = self.topics.write().await;
        let group = topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicGroup::new(self.default_capacity)))
            .clone();
        let rx = group.add_subscriber();
        (group, rx)
    }

    /// Unregister one subscriber of a topic. Removes the topic once nobody
    /// is left. Returns whether the topic was removed.
    pub async fn release(&self, topic: &str) -> bool {
        let mut topics = self.topics.write().await;
        let Some(group) = topics.get(topic) else {
            return false;
        };
        group.remove_subscriber();
        if group.subscriber_count() == 0 {
            topics.remove(topic);
            return true;
        }
        false
    }

    /// Existing group for a topic, if anyone ever subscribed.
    pub async fn get(&self, topic: &str) -> Option<Arc<TopicGroup>> {
        self.topics.read().await.get(topic).cloned()
    }

    /// Number of live topics.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    /// Names of live topics.
    pub async fn active_topics(&self) -> Vec<String> {
        self.topics.read().await.keys().cloned().collect()
    }
}
