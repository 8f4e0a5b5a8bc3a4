//! In-memory registry of the files currently being shared.
//!
//! The registry is the single source of truth for "what is shared right now".
//! Entries are keyed by an opaque [`FileId`] and listed in the order they were
//! added. Nothing here touches the filesystem; paths are recorded as given.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Length of the random part of a generated id.
const SUFFIX_LEN: usize = 5;

/// Characters used for the random part of a generated id.
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Registry shared between the lifecycle controller (writer) and the HTTP
/// handlers (readers).
pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Opaque identifier of a shared file.
///
/// Made of the current unix time in milliseconds followed by a short random
/// suffix. Ids only need to avoid accidental collisions, they are not secrets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_CHARSET[fastrand::usize(..SUFFIX_CHARSET.len())] as char)
            .collect();
        Self(format!("{}{}", millis, suffix))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A file registered for sharing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    /// Absolute location of the file on this host. Never sent to clients.
    pub source_path: PathBuf,
    /// Name offered to downloaders.
    pub display_name: String,
    /// Size captured when the file was shared.
    pub size_bytes: u64,
    /// Kind of file for display purposes, usually the extension (".pdf").
    pub media_kind: String,
}

/// Public view of a registry entry, as served by `GET /files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Map from [`FileId`] to [`SharedFile`] that remembers insertion order.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<FileId, SharedFile>,
    order: Vec<FileId>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this registry for sharing across tasks.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Register a file under a freshly generated id and return that id.
    pub fn put(&mut self, file: SharedFile) -> FileId {
        let mut id = FileId::generate();
        while self.entries.contains_key(&id) {
            id = FileId::generate();
        }

        self.entries.insert(id.clone(), file);
        self.order.push(id.clone());
        id
    }

    /// Look up a file by id.
    pub fn get(&self, id: &FileId) -> Option<&SharedFile> {
        self.entries.get(id)
    }

    /// Remove a file. Returns `false` if the id was not registered.
    pub fn remove(&mut self, id: &FileId) -> bool {
        if self.entries.remove(id).is_none() {
            return false;
        }
        self.order.retain(|existing| existing != id);
        true
    }

    /// Snapshot of all entries in insertion order, without source paths.
    pub fn list(&self) -> Vec<FileListing> {
        self.order
            .iter()
            .filter_map(|id| {
                self.entries.get(id).map(|file| FileListing {
                    id: id.clone(),
                    name: file.display_name.clone(),
                    size: file.size_bytes,
                    kind: file.media_kind.clone(),
                })
            })
            .collect()
    }

    /// Whether nothing is shared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of shared files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
