//! Local identity: a stable peer id, the last display name and the last
//! room, kept in a small key-value store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const PEER_ID_KEY: &str = "estima-id";
const NAME_KEY: &str = "estima-name";
const LAST_ROOM_KEY: &str = "estima-last-room";

/// Length of generated room ids.
pub const ROOM_ID_LEN: usize = 8;

/// Identity persistence errors.
#[derive(Debug)]
pub enum IdentityError {
    Io(std::io::Error),
    Serialization(String),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for IdentityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialization(_) => None,
        }
    }
}

impl From<std::io::Error> for IdentityError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// String key-value persistence.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), IdentityError>;
}

/// Volatile store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), IdentityError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON file store. The whole file is rewritten on every `set`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    /// Open a store, loading existing values. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        log::debug!("Opened identity store at {}", path.display());
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), IdentityError> {
        self.values.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

/// Identity accessors over a [`KeyValueStore`].
pub struct IdentityStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> IdentityStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The stable peer id, created on first use.
    pub fn peer_id(&mut self) -> Result<String, IdentityError> {
        if let Some(id) = self.store.get(PEER_ID_KEY).filter(|id| !id.is_empty()) {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        self.store.set(PEER_ID_KEY, &id)?;
        log::info!("Created peer id {id}");
        Ok(id)
    }

    /// Last used display name, empty if none.
    pub fn saved_name(&self) -> String {
        self.store.get(NAME_KEY).unwrap_or_default()
    }

    pub fn save_name(&mut self, name: &str) -> Result<(), IdentityError> {
        self.store.set(NAME_KEY, name)
    }

    /// Last joined room, empty if none.
    pub fn last_room(&self) -> String {
        self.store.get(LAST_ROOM_KEY).unwrap_or_default()
    }

    pub fn save_last_room(&mut self, room_id: &str) -> Result<(), IdentityError> {
        self.store.set(LAST_ROOM_KEY, room_id)
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

/// A fresh short room id.
pub fn generate_room_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(ROOM_ID_LEN);
    id
}

/// Extract a room id from user input: either a bare id or a link carrying
/// a `room=<id>` query parameter. `None` for blank input.
pub fn parse_room_input(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if !input.contains("://") {
        return Some(input.to_string());
    }

    let query = input
        .split_once('?')
        .map(|(_, q)| q.split('#').next().unwrap_or_default())
        .unwrap_or_default();
    let room = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "room")
        .map(|(_, value)| value.to_string());

    Some(room.unwrap_or_else(|| input.to_string()))
}
