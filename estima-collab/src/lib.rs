//! # estima-collab: Serverless planning-poker rooms
//!
//! Every participant holds a full replica of the room document. Replicas
//! exchange CRDT deltas over a dumb publish/subscribe relay; there is no
//! authoritative server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐                        ┌──────────────┐
//! │ Room (Alice) │                        │  Room (Bob)  │
//! │ RoomSession  │                        │ RoomSession  │
//! │  ├ Yrs Doc   │                        │  ├ Yrs Doc   │
//! │  ├ Presence  │                        │  ├ Presence  │
//! │  └ Provider  │                        │  └ Provider  │
//! └──────┬───────┘                        └──────┬───────┘
//!        │  Transport                  Transport │
//!        ▼                                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │  RelayServer / MemoryRelay   (topic fan-out only)    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`]: Yrs-backed roster / votes / meta stores
//! - [`snapshot`]: Materialized room views
//! - [`transport`]: Pub/sub transport trait and in-memory relay
//! - [`protocol`]: Room topic names and relay frame codec
//! - [`broadcast`]: Topic fan-out groups for the relay
//! - [`server`]: WebSocket relay server
//! - [`client`]: WebSocket transport with reconnect
//! - [`provider`]: Document ⇄ transport bridge
//! - [`presence`]: Heartbeat liveness and stale-peer eviction
//! - [`notify`]: Listener sets and subscriptions
//! - [`session`]: Synchronous room orchestrator
//! - [`room`]: Async room handle driven on a tokio task
//! - [`results`]: Card deck and vote summary
//! - [`identity`]: Stable peer id, saved name, room ids
//! - [`logger`]: Room activity logging

pub mod document;
pub mod snapshot;
pub mod transport;
pub mod protocol;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod provider;
pub mod presence;
pub mod notify;
pub mod session;
pub mod room;
pub mod results;
pub mod identity;
pub mod logger;

// Re-exports for convenience
pub use document::{DocumentError, Origin, ReplicatedDocument, Store};
pub use snapshot::{Participant, Phase, RoomSnapshot};
pub use transport::{
    ConnectionStatus, MemoryRelay, MemoryTransport, Transport, TransportEvent,
};
pub use protocol::{Channel, FrameType, ProtocolError, RelayFrame, RoomTopics, DEFAULT_NAMESPACE};
pub use broadcast::{TopicGroup, TopicManager, TopicStats};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use client::{ClientConfig, WsTransport};
pub use provider::{ProviderStats, SyncProvider, SyncSignal};
pub use presence::{PresenceConfig, PresenceTracker};
pub use notify::{Listeners, Subscription};
pub use session::{RoomConfig, RoomSession};
pub use room::Room;
pub use results::{summarize, VoteSummary, DECK};
pub use identity::{
    generate_room_id, parse_room_input, FileStore, IdentityError, IdentityStore,
    KeyValueStore, MemoryStore,
};
pub use logger::{attach_room_logger, attach_session_logger, diff_snapshots, RoomChange, RoomLogger};
