//! WebSocket transport talking to an `estima-relay` server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect)
//! - Topic subscribe/publish over bincode relay frames
//! - Keepalive pings
//!
//! A single background task owns the socket. The synchronous
//! [`Transport`] methods only enqueue commands for it, so they never block.
//!
//! ```text
//! Connecting ──► Connected ──► Offline ──► Reconnecting ──► Connected
//!      │                                        │
//!      └────────────── (attempts exhausted) ────┴──► Failed
//! ```
//!
//! Reference: Kleppmann, Chapter 8, Unreliable Networks

use std::time::Duration;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{FrameType, RelayFrame};
use crate::transport::{ConnectionStatus, EventSender, Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay URL, e.g. `ws://127.0.0.1:9090`
    pub url: String,
    /// Consecutive failed attempts before reporting `Failed`
    pub max_reconnect_attempts: u32,
    /// Base delay between attempts; grows linearly with the attempt count
    pub reconnect_delay: Duration,
    pub keepalive_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9090".to_string(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe(String),
    Publish(String, Vec<u8>),
    Shutdown,
}

enum SessionEnd {
    Lost,
    Shutdown,
}

/// WebSocket [`Transport`].
///
/// Must be connected from within a tokio runtime.
pub struct WsTransport {
    config: ClientConfig,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            commands: None,
            task: None,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the background task is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn send(&self, command: Command) {
        match &self.commands {
            Some(tx) => {
                if tx.send(command).is_err() {
                    log::trace!("WebSocket task gone, command dropped");
                }
            }
            None => log::trace!("Transport not connected, command dropped"),
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, events: EventSender) {
        if self.task.is_some() {
            log::warn!("WsTransport::connect called twice, ignoring");
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("WsTransport needs a tokio runtime: {e}");
                let _ = events.send(TransportEvent::Status(ConnectionStatus::Failed));
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(tx);
        self.task = Some(runtime.spawn(run(self.config.clone(), rx, events)));
    }

    fn subscribe(&mut self, topic: &str) {
        self.send(Command::Subscribe(topic.to_string()));
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) {
        self.send(Command::Publish(topic.to_string(), payload));
    }

    fn disconnect(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(Command::Shutdown);
        }
        // The task closes the socket on its own
        self.task = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Connection task
// ───────────────────────────────────────────────────────────────────

async fn run(
    config: ClientConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: EventSender,
) {
    let status = |s: ConnectionStatus| {
        let _ = events.send(TransportEvent::Status(s));
    };

    status(ConnectionStatus::Connecting);
    let mut attempt: u32 = 0;

    loop {
        let connecting = tokio_tungstenite::connect_async(config.url.as_str());
        tokio::pin!(connecting);

        let outcome = loop {
            tokio::select! {
                res = &mut connecting => break Some(res),
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break None,
                    Some(other) => log::trace!("Dropping {other:?} while connecting"),
                },
            }
        };

        match outcome {
            None => {
                status(ConnectionStatus::Disconnected);
                return;
            }
            Some(Ok((ws, _))) => {
                log::info!("Connected to relay {}", config.url);
                attempt = 0;
                status(ConnectionStatus::Connected);
                match drive(ws, &mut commands, &events, config.keepalive_interval).await {
                    SessionEnd::Shutdown => {
                        log::info!("Disconnected from relay {}", config.url);
                        status(ConnectionStatus::Disconnected);
                        return;
                    }
                    SessionEnd::Lost => {
                        log::warn!("Lost connection to relay {}", config.url);
                        status(ConnectionStatus::Offline);
                    }
                }
            }
            Some(Err(e)) => {
                log::warn!("Failed to connect to {}: {e}", config.url);
            }
        }

        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            log::error!(
                "Giving up on {} after {} attempts",
                config.url,
                config.max_reconnect_attempts
            );
            status(ConnectionStatus::Failed);
            return;
        }

        status(ConnectionStatus::Reconnecting);
        let backoff = tokio::time::sleep(config.reconnect_delay * attempt);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => break,
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => {
                        status(ConnectionStatus::Disconnected);
                        return;
                    }
                    Some(other) => log::trace!("Dropping {other:?} while offline"),
                },
            }
        }
    }
}

/// Pump one live connection until it drops or is shut down.
async fn drive(
    ws: WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &EventSender,
    keepalive: Duration,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let frame = match cmd {
                    Some(Command::Subscribe(topic)) => RelayFrame::subscribe(topic),
                    Some(Command::Publish(topic, payload)) => RelayFrame::publish(topic, payload),
                    Some(Command::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                };
                if !send_frame(&mut sink, &frame).await {
                    return SessionEnd::Lost;
                }
            }

            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    let frame = match RelayFrame::decode(&data) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!("Failed to decode relay frame: {e}");
                            continue;
                        }
                    };
                    match frame.frame_type {
                        FrameType::Publish => {
                            let event = TransportEvent::Message {
                                topic: frame.topic,
                                payload: frame.payload,
                            };
                            if events.send(event).is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        FrameType::Pong => log::trace!("Relay pong"),
                        other => log::debug!("Unexpected {other:?} frame from relay"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Err(e)) => {
                    log::warn!("WebSocket error: {e}");
                    return SessionEnd::Lost;
                }
                _ => {}
            },

            _ = ping.tick() => {
                if !send_frame(&mut sink, &RelayFrame::ping()).await {
                    return SessionEnd::Lost;
                }
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &RelayFrame) -> bool {
    let encoded = match frame.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("Failed to encode relay frame: {e}");
            return true;
        }
    };
    sink.send(Message::Binary(encoded.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn unused_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("ws://127.0.0.1:{port}")
    }

    async fn statuses(
        rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Vec<ConnectionStatus> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            if let TransportEvent::Status(s) = event {
                out.push(s);
                if matches!(s, ConnectionStatus::Failed | ConnectionStatus::Disconnected) {
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:9090");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_commands_before_connect_are_dropped() {
        let mut transport = WsTransport::new(ClientConfig::default());
        transport.subscribe("estima/r/update");
        transport.publish("estima/r/update", vec![1, 2, 3]);
        assert!(!transport.is_running());
    }

    #[test]
    fn test_connect_without_runtime_fails() {
        let mut transport = WsTransport::new(ClientConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::Status(ConnectionStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_unreachable_relay_fails_without_retries() {
        let mut config = ClientConfig::new(unused_url().await);
        config.max_reconnect_attempts = 0;
        let mut transport = WsTransport::new(config);
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx);

        assert_eq!(
            statuses(&mut rx).await,
            vec![ConnectionStatus::Connecting, ConnectionStatus::Failed]
        );
    }

    #[tokio::test]
    async fn test_unreachable_relay_retries_then_fails() {
        let mut config = ClientConfig::new(unused_url().await);
        config.max_reconnect_attempts = 2;
        config.reconnect_delay = Duration::from_millis(10);
        let mut transport = WsTransport::new(config);
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx);

        assert_eq!(
            statuses(&mut rx).await,
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Reconnecting,
                ConnectionStatus::Reconnecting,
                ConnectionStatus::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_while_retrying() {
        let mut config = ClientConfig::new(unused_url().await);
        config.reconnect_delay = Duration::from_secs(60);
        let mut transport = WsTransport::new(config);
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx);

        // Wait for the first retry to be scheduled
        loop {
            if let Some(TransportEvent::Status(ConnectionStatus::Reconnecting)) = rx.recv().await {
                break;
            }
        }
        transport.disconnect();
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Status(ConnectionStatus::Disconnected))
        );
    }
}
