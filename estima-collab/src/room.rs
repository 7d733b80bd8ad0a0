//! Async room handle.
//!
//! [`Room::join`] moves a [`RoomSession`] onto a tokio task that serializes
//! everything touching the room: commands from the handle, inbound transport
//! events and the two periodic presence timers.
//!
//! ```text
//!   Room (handle) ── commands ──►┐
//!                                 │   driver task
//!   Transport ─── events ───────►├── tokio::select! ──► RoomSession
//!                                 │
//!   heartbeat / sweep intervals ─►┘          │
//!                                            ▼
//!                               watch + listeners ──► Room (handle)
//! ```
//!
//! The driver stops when the handle is destroyed or dropped, which also
//! cancels both timers.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::notify::{Listeners, Subscription};
use crate::session::{RoomConfig, RoomSession};
use crate::snapshot::{Participant, RoomSnapshot};
use crate::transport::{ConnectionStatus, Transport};

#[derive(Debug)]
enum RoomCommand {
    Vote(String),
    ClearVote,
    ToggleVote(String),
    Reveal,
    Reset,
    SetIssue(String),
    Flush(oneshot::Sender<()>),
    Destroy,
}

/// Handle to a joined room.
pub struct Room {
    room_id: String,
    my_id: String,
    commands: mpsc::UnboundedSender<RoomCommand>,
    snapshot_rx: watch::Receiver<RoomSnapshot>,
    status_rx: watch::Receiver<ConnectionStatus>,
    listeners: Listeners<RoomSnapshot>,
    status_listeners: Listeners<ConnectionStatus>,
    driver: Option<JoinHandle<()>>,
}

impl Room {
    /// Join a room and start driving it. Must be called within a tokio
    /// runtime.
    pub fn join(
        config: RoomConfig,
        room_id: impl Into<String>,
        me: Participant,
        transport: impl Transport,
    ) -> Self {
        let interval = config.presence.heartbeat_interval;
        let session = RoomSession::join(config, room_id, me, transport);

        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (status_tx, status_rx) = watch::channel(session.status());
        // Registered before any user listener, so watchers see a value first
        let forwarders = [
            session.subscribe(move |snap| {
                snapshot_tx.send_replace(snap.clone());
            }),
            session.subscribe_status(move |status| {
                status_tx.send_replace(*status);
            }),
        ];

        let (commands, rx) = mpsc::unbounded_channel();
        let room_id = session.room_id().to_string();
        let my_id = session.my_id().to_string();
        let listeners = session.listeners();
        let status_listeners = session.status_listeners();
        let driver = tokio::spawn(drive(session, rx, interval, forwarders));

        Self {
            room_id,
            my_id,
            commands,
            snapshot_rx,
            status_rx,
            listeners,
            status_listeners,
            driver: Some(driver),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn my_id(&self) -> &str {
        &self.my_id
    }

    /// Latest committed snapshot.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch channel over snapshots.
    pub fn watch(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Watch channel over connection status.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Listen for snapshots. Listeners run on the driver task.
    pub fn subscribe(&self, listener: impl FnMut(&RoomSnapshot) + Send + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    pub fn subscribe_status(
        &self,
        listener: impl FnMut(&ConnectionStatus) + Send + 'static,
    ) -> Subscription {
        self.status_listeners.subscribe(listener)
    }

    pub fn vote(&self, value: impl Into<String>) {
        self.send(RoomCommand::Vote(value.into()));
    }

    pub fn clear_vote(&self) {
        self.send(RoomCommand::ClearVote);
    }

    pub fn toggle_vote(&self, value: impl Into<String>) {
        self.send(RoomCommand::ToggleVote(value.into()));
    }

    pub fn reveal(&self) {
        self.send(RoomCommand::Reveal);
    }

    pub fn reset(&self) {
        self.send(RoomCommand::Reset);
    }

    pub fn set_issue(&self, issue: impl Into<String>) {
        self.send(RoomCommand::SetIssue(issue.into()));
    }

    /// Wait until every command sent so far, and every transport event
    /// already received, has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(RoomCommand::Flush(tx));
        let _ = rx.await;
    }

    /// Leave the room and wait for teardown to finish.
    pub async fn destroy(mut self) {
        self.send(RoomCommand::Destroy);
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                log::error!("Room {} driver failed: {e}", self.room_id);
            }
        }
    }

    fn send(&self, command: RoomCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("Room {} is closed, command dropped", self.room_id);
        }
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        if self.driver.is_some() {
            let _ = self.commands.send(RoomCommand::Destroy);
        }
    }
}

async fn drive(
    mut session: RoomSession,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
    period: std::time::Duration,
    forwarders: [Subscription; 2],
) {
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut events_open = true;

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(RoomCommand::Destroy) | None => break,
                Some(RoomCommand::Vote(value)) => session.vote(&value),
                Some(RoomCommand::ClearVote) => session.clear_vote(),
                Some(RoomCommand::ToggleVote(value)) => session.toggle_vote(&value),
                Some(RoomCommand::Reveal) => session.reveal(),
                Some(RoomCommand::Reset) => session.reset(),
                Some(RoomCommand::SetIssue(issue)) => session.set_issue(&issue),
                Some(RoomCommand::Flush(done)) => {
                    session.pump();
                    let _ = done.send(());
                }
            },

            event = session.next_event(), if events_open => match event {
                Some(event) => session.handle_transport_event(event, Instant::now()),
                None => {
                    log::debug!("Transport events closed for room {}", session.room_id());
                    events_open = false;
                }
            },

            _ = heartbeat.tick() => session.heartbeat_tick(Instant::now()),

            _ = sweep.tick() => {
                session.sweep(Instant::now());
            }
        }
    }

    session.destroy();
    drop(forwarders);
}
