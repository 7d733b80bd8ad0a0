//! Room activity logging.
//!
//! Diffs consecutive snapshots and logs what changed: joins, departures,
//! votes, phase and issue. Connection status transitions are logged too.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::notify::{Listeners, Subscription};
use crate::room::Room;
use crate::session::RoomSession;
use crate::snapshot::{Phase, RoomSnapshot};
use crate::transport::ConnectionStatus;

/// One observed change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomChange {
    Joined { id: String, name: String },
    Left { id: String, name: String },
    Voted { id: String, name: String, value: String },
    VoteCleared { id: String, name: String },
    PhaseChanged { from: Phase, to: Phase },
    IssueChanged(String),
}

impl std::fmt::Display for RoomChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Joined { id, name } => write!(f, "+ {name} ({})", short(id)),
            Self::Left { id, name } => write!(f, "- {name} ({})", short(id)),
            Self::Voted { name, value, .. } => write!(f, "vote: {name} -> {value}"),
            Self::VoteCleared { name, .. } => write!(f, "vote cleared: {name}"),
            Self::PhaseChanged { from, to } => write!(f, "phase: {from} -> {to}"),
            Self::IssueChanged(issue) => write!(f, "issue: \"{issue}\""),
        }
    }
}

fn short(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Changes from `prev` to `next`, in a stable order.
pub fn diff_snapshots(prev: &RoomSnapshot, next: &RoomSnapshot) -> Vec<RoomChange> {
    let before: BTreeMap<&str, &str> = prev
        .participants
        .iter()
        .map(|p| (p.id.as_str(), p.name.as_str()))
        .collect();
    let after: BTreeMap<&str, &str> = next
        .participants
        .iter()
        .map(|p| (p.id.as_str(), p.name.as_str()))
        .collect();

    let mut changes = Vec::new();
    for (id, name) in &after {
        if !before.contains_key(id) {
            changes.push(RoomChange::Joined {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
    }
    for (id, name) in &before {
        if !after.contains_key(id) {
            changes.push(RoomChange::Left {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
    }

    for (id, value) in &next.votes {
        if prev.votes.get(id) != Some(value) {
            let name = after.get(id.as_str()).map_or_else(|| short(id), |n| *n);
            changes.push(RoomChange::Voted {
                id: id.clone(),
                name: name.to_string(),
                value: value.clone(),
            });
        }
    }
    for id in prev.votes.keys() {
        if !next.votes.contains_key(id) {
            let name = before.get(id.as_str()).map_or_else(|| short(id), |n| *n);
            changes.push(RoomChange::VoteCleared {
                id: id.clone(),
                name: name.to_string(),
            });
        }
    }

    if prev.phase != next.phase {
        changes.push(RoomChange::PhaseChanged {
            from: prev.phase,
            to: next.phase,
        });
    }
    if prev.issue != next.issue {
        changes.push(RoomChange::IssueChanged(next.issue.clone()));
    }
    changes
}

/// Keeps the logging listeners registered. Dropping it detaches the logger.
#[must_use = "dropping a RoomLogger detaches it"]
#[derive(Debug)]
pub struct RoomLogger {
    _snapshots: Subscription,
    _status: Subscription,
}

impl RoomLogger {
    /// Detach explicitly.
    pub fn detach(self) {}
}

/// Log the activity of an async room.
pub fn attach_room_logger(room: &Room) -> RoomLogger {
    let initial = room.snapshot();
    attach(
        initial,
        |l| room.subscribe(l),
        |l| room.subscribe_status(l),
    )
}

/// Log the activity of a manually driven session.
pub fn attach_session_logger(session: &RoomSession) -> RoomLogger {
    let initial = session.snapshot();
    let listeners: Listeners<RoomSnapshot> = session.listeners();
    let status: Listeners<ConnectionStatus> = session.status_listeners();
    attach(
        initial,
        |l| listeners.subscribe(l),
        |l| status.subscribe(l),
    )
}

type SnapshotListener = Box<dyn FnMut(&RoomSnapshot) + Send>;
type StatusListener = Box<dyn FnMut(&ConnectionStatus) + Send>;

fn attach(
    initial: RoomSnapshot,
    subscribe: impl FnOnce(SnapshotListener) -> Subscription,
    subscribe_status: impl FnOnce(StatusListener) -> Subscription,
) -> RoomLogger {
    log::debug!(
        target: "estima::room",
        "joined as {} with {} participant(s)",
        short(&initial.my_id),
        initial.participants.len()
    );

    let _status = subscribe_status(Box::new(|status: &ConnectionStatus| {
        log::debug!(target: "estima::transport", "{status}");
    }));

    let prev = Arc::new(Mutex::new(initial));
    let _snapshots = subscribe(Box::new(move |next: &RoomSnapshot| {
        let mut prev = prev.lock().unwrap_or_else(|e| e.into_inner());
        for change in diff_snapshots(&prev, next) {
            log::debug!(target: "estima::room", "{change}");
        }
        *prev = next.clone();
    }));

    RoomLogger { _snapshots, _status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Participant;

    fn snapshot() -> RoomSnapshot {
        let mut snap = RoomSnapshot::empty("aaaaaaaa-1111");
        snap.participants = vec![
            Participant::new("aaaaaaaa-1111", "Alice"),
            Participant::new("bbbbbbbb-2222", "Bob"),
        ];
        snap
    }

    #[test]
    fn test_no_changes() {
        assert!(diff_snapshots(&snapshot(), &snapshot()).is_empty());
    }

    #[test]
    fn test_join_and_leave() {
        let prev = snapshot();
        let mut next = snapshot();
        next.participants.remove(1);
        next.participants.push(Participant::new("cccccccc-3333", "Carol"));

        let changes = diff_snapshots(&prev, &next);
        assert_eq!(
            changes,
            vec![
                RoomChange::Joined {
                    id: "cccccccc-3333".into(),
                    name: "Carol".into()
                },
                RoomChange::Left {
                    id: "bbbbbbbb-2222".into(),
                    name: "Bob".into()
                },
            ]
        );
        assert_eq!(changes[0].to_string(), "+ Carol (cccccccc)");
    }

    #[test]
    fn test_votes_phase_issue() {
        let mut prev = snapshot();
        prev.votes.insert("bbbbbbbb-2222".into(), "3".into());
        let mut next = snapshot();
        next.votes.insert("aaaaaaaa-1111".into(), "8".into());
        next.phase = Phase::Revealed;
        next.issue = "Billing".into();

        let changes = diff_snapshots(&prev, &next);
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[0].to_string(), "vote: Alice -> 8");
        assert_eq!(changes[1].to_string(), "vote cleared: Bob");
        assert_eq!(changes[2].to_string(), "phase: voting -> revealed");
        assert_eq!(changes[3].to_string(), "issue: \"Billing\"");
    }

    #[test]
    fn test_vote_from_unknown_peer_uses_short_id() {
        let prev = snapshot();
        let mut next = snapshot();
        next.votes.insert("zzzzzzzz-9999".into(), "5".into());
        let changes = diff_snapshots(&prev, &next);
        assert_eq!(changes[0].to_string(), "vote: zzzzzzzz -> 5");
    }

    #[test]
    fn test_session_logger_attaches_and_detaches() {
        let relay = crate::transport::MemoryRelay::new();
        let mut session = RoomSession::join(
            crate::session::RoomConfig::default(),
            "room",
            Participant::new("a", "Alice"),
            relay.transport(),
        );
        let logger = attach_session_logger(&session);
        assert_eq!(session.listeners().len(), 1);
        assert_eq!(session.status_listeners().len(), 1);

        session.vote("5");
        logger.detach();
        assert!(session.listeners().is_empty());
    }
}
