//! Materialized, immutable views of the room document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::document::{ReplicatedDocument, Store};

/// Meta key holding the round phase.
pub const PHASE_KEY: &str = "phase";
/// Meta key holding the issue under estimation.
pub const ISSUE_KEY: &str = "issue";

/// Round phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Votes are hidden
    #[default]
    Voting,
    /// Votes are visible to everyone
    Revealed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Voting => "voting",
            Phase::Revealed => "revealed",
        }
    }

    /// Parse a stored phase. Unknown values read as `Voting`.
    pub fn parse(value: &str) -> Self {
        match value {
            "revealed" => Phase::Revealed,
            _ => Phase::Voting,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Fully materialized room state as seen by one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Roster ordered by name, then id
    pub participants: Vec<Participant>,
    /// Cast votes keyed by peer id
    pub votes: BTreeMap<String, String>,
    pub phase: Phase,
    pub issue: String,
    pub my_id: String,
}

impl RoomSnapshot {
    /// An empty snapshot for a replica that has not joined yet.
    pub fn empty(my_id: impl Into<String>) -> Self {
        Self {
            participants: Vec::new(),
            votes: BTreeMap::new(),
            phase: Phase::Voting,
            issue: String::new(),
            my_id: my_id.into(),
        }
    }

    /// Derive a snapshot from the document. O(roster + votes).
    pub fn from_document(doc: &ReplicatedDocument, my_id: &str) -> Self {
        let mut participants = Vec::with_capacity(doc.len(Store::Roster));
        doc.for_each(Store::Roster, |id, name| {
            participants.push(Participant::new(id, name));
        });
        participants.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let mut votes = BTreeMap::new();
        doc.for_each(Store::Votes, |id, value| {
            votes.insert(id.to_string(), value.to_string());
        });

        let phase = doc
            .get(Store::Meta, PHASE_KEY)
            .map(|p| Phase::parse(&p))
            .unwrap_or_default();
        let issue = doc.get(Store::Meta, ISSUE_KEY).unwrap_or_default();

        Self {
            participants,
            votes,
            phase,
            issue,
            my_id: my_id.to_string(),
        }
    }

    /// The local peer's vote, if cast.
    pub fn my_vote(&self) -> Option<&str> {
        self.votes.get(&self.my_id).map(String::as_str)
    }

    /// Whether a participant is in the roster.
    pub fn has_participant(&self, id: &str) -> bool {
        self.participants.iter().any(|p| p.id == id)
    }

    /// Display name for a peer id.
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.name.as_str())
    }

    /// Compare replicated content, ignoring `my_id`.
    pub fn same_content(&self, other: &RoomSnapshot) -> bool {
        self.participants == other.participants
            && self.votes == other.votes
            && self.phase == other.phase
            && self.issue == other.issue
    }
}
