//! CLI command implementations.

pub mod dump;
pub mod export;
pub mod inspect;
pub mod migrate;
pub mod verify;

use refgraph_storage::{NodeMap, SqliteReader, StoreResult, TableCounts, VerifyReport};
use std::path::Path;

/// A stored graph opened for reading.
pub enum Store {
    /// Relational store file.
    Sqlite(SqliteReader),
    /// CBOR node-map snapshot.
    Snapshot(NodeMap),
}

impl Store {
    /// Opens `path`, treating `.cbor` files as snapshots and everything else
    /// as a relational store.
    pub fn open(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Err(format!("No store found at {:?}", path).into());
        }
        let store = if is_snapshot(path) {
            Store::Snapshot(NodeMap::load_file(path)?)
        } else {
            Store::Sqlite(SqliteReader::open(path)?)
        };
        Ok(store)
    }

    /// Short name of the store kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Store::Sqlite(_) => "sqlite",
            Store::Snapshot(_) => "snapshot",
        }
    }

    /// Loads every node.
    pub fn node_map(&self) -> StoreResult<NodeMap> {
        match self {
            Store::Sqlite(reader) => reader.to_node_map(),
            Store::Snapshot(map) => Ok(map.clone()),
        }
    }

    /// Table row counts, for relational stores.
    pub fn counts(&self) -> StoreResult<Option<TableCounts>> {
        match self {
            Store::Sqlite(reader) => reader.counts().map(Some),
            Store::Snapshot(_) => Ok(None),
        }
    }

    /// Runs every structural check the store supports.
    pub fn verify(&self) -> StoreResult<VerifyReport> {
        match self {
            Store::Sqlite(reader) => reader.verify(),
            Store::Snapshot(map) => Ok(refgraph_storage::verify_node_map(map)),
        }
    }
}

/// Returns `true` if `path` names a CBOR snapshot.
pub fn is_snapshot(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "cbor")
}
