//! Replicated room document backed by a Yrs `Doc`.
//!
//! The document holds three root maps:
//! ```text
//! ┌──────────────┬─────────────────────┐
//! │ participants │ peer_id → name      │
//! │ votes        │ peer_id → card      │
//! │ meta         │ "phase" / "issue"   │
//! └──────────────┴─────────────────────┘
//! ```
//!
//! Merge semantics are entirely Yrs': applying the same update twice is a
//! no-op and updates commute. This module only decides which updates leave
//! the replica: every committed local transaction queues exactly one v1
//! update in the outbound queue, remote updates never do.
//!
//! Reference: Kleppmann, Chapter 5, Replication

use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, Map, MapRef, Out, ReadTxn, StateVector, Transact, TransactionMut, Update};

/// Logical stores inside the room document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    /// Participant roster: peer id → display name
    Roster,
    /// Cast votes: peer id → card value
    Votes,
    /// Session metadata: phase and issue
    Meta,
}

impl Store {
    pub const ALL: [Store; 3] = [Store::Roster, Store::Votes, Store::Meta];

    /// Root map name inside the Yrs document.
    pub fn name(&self) -> &'static str {
        match self {
            Store::Roster => "participants",
            Store::Votes => "votes",
            Store::Meta => "meta",
        }
    }
}

/// Where an applied update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced on this replica; queued for publishing.
    Local,
    /// Received from the network; never re-published.
    Remote,
}

/// Document errors.
#[derive(Debug, Clone)]
pub enum DocumentError {
    /// Update bytes could not be decoded.
    Decode(String),
    /// Decoded update was rejected while integrating.
    Apply(String),
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "Malformed update: {e}"),
            Self::Apply(e) => write!(f, "Failed to apply update: {e}"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// The replicated room document.
pub struct ReplicatedDocument {
    doc: Doc,
    roster: MapRef,
    votes: MapRef,
    meta: MapRef,
    /// Encoded updates of committed local transactions, oldest first.
    local_changes: Vec<Vec<u8>>,
}

impl ReplicatedDocument {
    /// Create an empty document with a random Yrs client id.
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Create an empty document with a fixed Yrs client id (for testing).
    pub fn with_client_id(client_id: u64) -> Self {
        Self::from_doc(Doc::with_client_id(client_id))
    }

    fn from_doc(doc: Doc) -> Self {
        let roster = doc.get_or_insert_map(Store::Roster.name());
        let votes = doc.get_or_insert_map(Store::Votes.name());
        let meta = doc.get_or_insert_map(Store::Meta.name());
        Self {
            doc,
            roster,
            votes,
            meta,
            local_changes: Vec::new(),
        }
    }

    fn map(&self, store: Store) -> &MapRef {
        match store {
            Store::Roster => &self.roster,
            Store::Votes => &self.votes,
            Store::Meta => &self.meta,
        }
    }

    /// Read a string value.
    pub fn get(&self, store: Store, key: &str) -> Option<String> {
        let txn = self.doc.transact();
        self.map(store).get(&txn, key).and_then(out_to_string)
    }

    /// Whether `key` is present in `store`.
    pub fn has(&self, store: Store, key: &str) -> bool {
        let txn = self.doc.transact();
        self.map(store).contains_key(&txn, key)
    }

    /// Number of entries in `store`.
    pub fn len(&self, store: Store) -> usize {
        let txn = self.doc.transact();
        self.map(store).len(&txn) as usize
    }

    /// Visit every string entry of `store`. Order is unspecified.
    pub fn for_each(&self, store: Store, mut f: impl FnMut(&str, &str)) {
        let txn = self.doc.transact();
        for (key, value) in self.map(store).iter(&txn) {
            if let Some(value) = out_to_string(value) {
                f(key, &value);
            }
        }
    }

    /// Keys of `store`. Order is unspecified.
    pub fn keys(&self, store: Store) -> Vec<String> {
        let txn = self.doc.transact();
        self.map(store).keys(&txn).map(str::to_string).collect()
    }

    /// Set a single value as its own transaction.
    pub fn set(&mut self, store: Store, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.transact(|txn| txn.set(store, key, value));
    }

    /// Delete a single key as its own transaction. Returns whether it existed.
    pub fn delete(&mut self, store: Store, key: &str) -> bool {
        self.transact(|txn| txn.delete(store, key))
    }

    /// Run `f` as one atomic transaction.
    ///
    /// All mutations made through the [`DocTransaction`] are committed
    /// together and, if anything changed, queued as a single update.
    pub fn transact<R>(&mut self, f: impl FnOnce(&mut DocTransaction<'_>) -> R) -> R {
        let (result, delta) = {
            let mut txn = DocTransaction {
                txn: self.doc.transact_mut(),
                roster: &self.roster,
                votes: &self.votes,
                meta: &self.meta,
                changed: false,
            };
            let result = f(&mut txn);
            let delta = txn.changed.then(|| txn.txn.encode_update_v1());
            (result, delta)
        };
        if let Some(delta) = delta {
            self.local_changes.push(delta);
        }
        result
    }

    /// Encode the complete document state as a single update.
    pub fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Integrate an encoded update.
    ///
    /// Updates applied with [`Origin::Local`] are queued for publishing as-is.
    pub fn apply_delta(&mut self, delta: &[u8], origin: Origin) -> Result<(), DocumentError> {
        let update = Update::decode_v1(delta).map_err(|e| DocumentError::Decode(e.to_string()))?;
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| DocumentError::Apply(e.to_string()))?;
        }
        if origin == Origin::Local {
            self.local_changes.push(delta.to_vec());
        }
        Ok(())
    }

    /// Drain the updates of committed local transactions.
    pub fn take_local_changes(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.local_changes)
    }

    /// Number of queued local updates.
    pub fn pending_local_changes(&self) -> usize {
        self.local_changes.len()
    }
}

impl Default for ReplicatedDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// A write transaction over the three room stores.
pub struct DocTransaction<'doc> {
    txn: TransactionMut<'doc>,
    roster: &'doc MapRef,
    votes: &'doc MapRef,
    meta: &'doc MapRef,
    changed: bool,
}

impl<'doc> DocTransaction<'doc> {
    fn map(&self, store: Store) -> &'doc MapRef {
        match store {
            Store::Roster => self.roster,
            Store::Votes => self.votes,
            Store::Meta => self.meta,
        }
    }

    pub fn set(&mut self, store: Store, key: &str, value: impl Into<String>) {
        let map = self.map(store);
        map.insert(&mut self.txn, key.to_string(), value.into());
        self.changed = true;
    }

    /// Remove `key`. Returns whether it existed.
    pub fn delete(&mut self, store: Store, key: &str) -> bool {
        let map = self.map(store);
        let removed = map.remove(&mut self.txn, key).is_some();
        self.changed |= removed;
        removed
    }

    pub fn get(&self, store: Store, key: &str) -> Option<String> {
        self.map(store).get(&self.txn, key).and_then(out_to_string)
    }

    pub fn has(&self, store: Store, key: &str) -> bool {
        self.map(store).contains_key(&self.txn, key)
    }

    pub fn keys(&self, store: Store) -> Vec<String> {
        self.map(store).keys(&self.txn).map(str::to_string).collect()
    }

    /// Remove every entry of `store`. Returns how many were removed.
    pub fn clear(&mut self, store: Store) -> usize {
        let keys = self.keys(store);
        keys.iter().filter(|key| self.delete(store, key)).count()
    }
}

fn out_to_string(value: Out) -> Option<String> {
    match value {
        Out::Any(Any::String(s)) => Some(s.to_string()),
        _ => None,
    }
}
