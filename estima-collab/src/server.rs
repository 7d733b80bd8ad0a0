//! WebSocket publish/subscribe relay.
//!
//! Architecture:
//! ```text
//! Client A ──┐                      ┌──► Client A
//!             ├── Publish(topic) ──► TopicGroup ──┼──► Client B
//! Client B ──┘                      └──► Client C
//! ```
//!
//! The relay keeps no document state. It only tracks live subscriptions and
//! fans each publish out to every subscriber of the topic, the publisher
//! included. Publishes to topics nobody subscribes to are dropped; clients
//! recover through their own catch-up protocol.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::TopicManager;
use crate::protocol::{FrameType, RelayFrame};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per subscriber before it starts losing them
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub active_topics: usize,
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    topics: Arc<TopicManager>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let topics = Arc::new(TopicManager::new(config.broadcast_capacity));
        Self {
            config,
            topics,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let topics = self.topics.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, topics, stats.clone()).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        topics: Arc<TopicManager>,
        stats: Arc<RwLock<RelayStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Frames destined for this client, fed by per-topic forwarders.
        let (out_tx, mut out_rx) = mpsc::channel::<Arc<Vec<u8>>>(256);
        let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();

        let result: Result<(), Box<dyn std::error::Error + Send + Sync>> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let bytes: Vec<u8> = data.into();
                                {
                                    let mut s = stats.write().await;
                                    s.total_frames += 1;
                                    s.total_bytes += bytes.len() as u64;
                                }
                                let frame = match RelayFrame::decode(&bytes) {
                                    Ok(frame) => frame,
                                    Err(e) => {
                                        log::warn!("Failed to decode frame from {addr}: {e}");
                                        continue;
                                    }
                                };

                                match frame.frame_type {
                                    FrameType::Subscribe => {
                                        if forwarders.contains_key(&frame.topic) {
                                            continue;
                                        }
                                        let (group, rx) = topics.subscribe(&frame.topic).await;
                                        let handle = spawn_forwarder(
                                            frame.topic.clone(),
                                            group,
                                            rx,
                                            out_tx.clone(),
                                        );
                                        log::debug!("{addr} subscribed to {}", frame.topic);
                                        forwarders.insert(frame.topic, handle);
                                    }
                                    FrameType::Unsubscribe => {
                                        if let Some(handle) = forwarders.remove(&frame.topic) {
                                            release_topic(&topics, &frame.topic, handle).await;
                                        }
                                    }
                                    FrameType::Publish => {
                                        match topics.get(&frame.topic).await {
                                            Some(group) => {
                                                let reached = group.publish(Arc::new(bytes));
                                                log::trace!("Publish on {} reached {reached}", frame.topic);
                                            }
                                            None => {
                                                log::trace!("Publish on {} with no subscribers dropped", frame.topic);
                                            }
                                        }
                                    }
                                    FrameType::Ping => {
                                        let pong = RelayFrame::pong().encode()?;
                                        ws_sender.send(Message::Binary(pong.into())).await?;
                                    }
                                    FrameType::Pong => {}
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    Some(data) = out_rx.recv() => {
                        ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                    }
                }
            }
            Ok(())
        }
        .await;

        // Cleanup: drop every subscription of this connection
        for (topic, handle) in forwarders.drain() {
            release_topic(&topics, &topic, handle).await;
        }

        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_topics = topics.topic_count().await;
        }

        result
    }

    /// Get relay statistics.
    pub async fn stats(&self) -> RelayStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_topics = self.topics.topic_count().await;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the topic manager.
    pub fn topics(&self) -> &Arc<TopicManager> {
        &self.topics
    }
}

/// Forward a topic's frames into a connection's outgoing queue.
fn spawn_forwarder(
    topic: String,
    group: Arc<crate::broadcast::TopicGroup>,
    mut rx: broadcast::Receiver<Arc<Vec<u8>>>,
    out_tx: mpsc::Sender<Arc<Vec<u8>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(data) => {
                    if out_tx.send(data).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Subscriber of {topic} lagged by {n} frames");
                    group.record_lag(n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn release_topic(topics: &TopicManager, topic: &str, handle: JoinHandle<()>) {
    handle.abort();
    topics.release(topic).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn test_relay_custom_config() {
        let server = RelayServer::new(RelayConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            broadcast_capacity: 32,
        });
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_relay_stats_initial() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.active_topics, 0);
        assert_eq!(server.topics().topic_count().await, 0);
    }
}
