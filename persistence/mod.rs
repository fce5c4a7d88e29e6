/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Forest persistence: a versioned JSON snapshot kept in a blob store.
//!
//! - [`encode`] / [`decode`] convert between the forest and a snapshot
//! - [`RedbBlobStore`] keeps the latest snapshot in a redb table
//! - [`saver::DebouncedSaver`] writes after changes go quiet
//!
//! Load failures never stop startup: an unreadable snapshot yields an empty
//! store and the reconciler rebuilds from the host.

pub mod saver;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use forest_core::{Forest, HierarchyStore, Node, TabId, now_ms};
use log::{debug, info, warn};
use parking_lot::Mutex;
use redb::ReadableDatabase;
use types::{ForestSnapshot, ForestSnapshotV1, SNAPSHOT_VERSION};

const SNAPSHOT_TABLE: redb::TableDefinition<&str, &[u8]> = redb::TableDefinition::new("snapshots");
const LATEST_KEY: &str = "latest";
const DB_FILE_NAME: &str = "forest.redb";

#[derive(Debug)]
pub enum PersistenceError {
    Io(String),
    Redb(String),
    Codec(String),
    UnsupportedVersion(u64),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "IO error: {e}"),
            PersistenceError::Redb(e) => write!(f, "Redb error: {e}"),
            PersistenceError::Codec(e) => write!(f, "Snapshot codec error: {e}"),
            PersistenceError::UnsupportedVersion(v) => {
                write!(f, "Unsupported snapshot version {v}")
            },
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Opaque storage for the latest snapshot.
pub trait BlobStore: Send + Sync + 'static {
    fn load_blob(&self) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn save_blob(&self, bytes: &[u8]) -> Result<(), PersistenceError>;
}

/// Keeps the blob in memory; cloned handles share it.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<MemoryBlob>>,
}

#[derive(Debug, Default)]
struct MemoryBlob {
    bytes: Option<Vec<u8>>,
    saves: usize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(bytes: Vec<u8>) -> Self {
        let store = Self::default();
        store.inner.lock().bytes = Some(bytes);
        store
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.inner.lock().saves
    }
}

impl BlobStore for MemoryBlobStore {
    fn load_blob(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.inner.lock().bytes.clone())
    }

    fn save_blob(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        inner.bytes = Some(bytes.to_vec());
        inner.saves += 1;
        Ok(())
    }
}

/// The latest snapshot under a single key of a redb table.
pub struct RedbBlobStore {
    db: redb::Database,
}

impl RedbBlobStore {
    /// Open or create `forest.redb` inside `dir`.
    pub fn open(dir: &Path) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| PersistenceError::Io(format!("Failed to create dir: {e}")))?;
        let db = redb::Database::create(dir.join(DB_FILE_NAME))
            .map_err(|e| PersistenceError::Redb(format!("{e}")))?;
        Ok(Self { db })
    }
}

impl BlobStore for RedbBlobStore {
    fn load_blob(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| PersistenceError::Redb(format!("{e}")))?;
        // A fresh database has no table yet.
        let Ok(table) = read_txn.open_table(SNAPSHOT_TABLE) else {
            return Ok(None);
        };
        let entry = table
            .get(LATEST_KEY)
            .map_err(|e| PersistenceError::Redb(format!("{e}")))?;
        Ok(entry.map(|guard| guard.value().to_vec()))
    }

    fn save_blob(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| PersistenceError::Redb(format!("{e}")))?;
        {
            let mut table = write_txn
                .open_table(SNAPSHOT_TABLE)
                .map_err(|e| PersistenceError::Redb(format!("{e}")))?;
            table
                .insert(LATEST_KEY, bytes)
                .map_err(|e| PersistenceError::Redb(format!("{e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| PersistenceError::Redb(format!("{e}")))?;
        Ok(())
    }
}

/// Serialize the forest as a current-version snapshot.
pub fn encode(forest: &Forest) -> Result<Vec<u8>, PersistenceError> {
    let nodes: Vec<Node> = forest
        .sorted_ids()
        .into_iter()
        .filter_map(|id| forest.node(id).cloned())
        .collect();
    let snapshot = ForestSnapshot {
        version: SNAPSHOT_VERSION,
        nodes,
        roots: forest.roots().iter().copied().collect(),
        saved_at_ms: now_ms(),
    };
    serde_json::to_vec(&snapshot).map_err(|e| PersistenceError::Codec(format!("{e}")))
}

/// Rebuild a store from any supported snapshot version.
///
/// A document without a `version` field predates versioning and is read as
/// version 1.
pub fn decode(bytes: &[u8]) -> Result<HierarchyStore, PersistenceError> {
    let document: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Codec(format!("{e}")))?;
    let version = match document.get("version") {
        None => 1,
        Some(raw) => raw
            .as_u64()
            .ok_or_else(|| PersistenceError::Codec(format!("invalid version {raw}")))?,
    };

    let (nodes, mut roots): (Vec<Node>, Vec<TabId>) = match version {
        1 => {
            let snapshot: ForestSnapshotV1 = serde_json::from_value(document)
                .map_err(|e| PersistenceError::Codec(format!("{e}")))?;
            debug!("persistence: migrating version 1 snapshot");
            (
                snapshot.nodes.into_iter().map(Node::from).collect(),
                snapshot.roots,
            )
        },
        2 => {
            let snapshot: ForestSnapshot = serde_json::from_value(document)
                .map_err(|e| PersistenceError::Codec(format!("{e}")))?;
            (snapshot.nodes, snapshot.roots)
        },
        other => return Err(PersistenceError::UnsupportedVersion(other)),
    };

    let store = HierarchyStore::from_nodes(nodes);
    roots.sort();
    roots.dedup();
    if roots != store.root_ids() {
        debug!("persistence: stored root list disagreed with parent links; recomputed");
    }
    Ok(store)
}

/// Encode and write the forest.
pub fn save_forest(blobs: &dyn BlobStore, forest: &Forest) -> Result<(), PersistenceError> {
    let bytes = encode(forest)?;
    blobs.save_blob(&bytes)
}

/// Load the persisted store, falling back to an empty one on any failure.
pub fn load_store(blobs: &dyn BlobStore) -> HierarchyStore {
    let bytes = match blobs.load_blob() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return HierarchyStore::new(),
        Err(e) => {
            warn!("Failed to read persisted forest: {e}");
            return HierarchyStore::new();
        },
    };
    match decode(&bytes) {
        Ok(store) => {
            info!("persistence: restored {} tab(s)", store.len());
            store
        },
        Err(e) => {
            warn!("Failed to decode persisted forest: {e}");
            HierarchyStore::new()
        },
    }
}
