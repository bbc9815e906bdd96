//! Error types for storage operations.

use crate::id::NodeId;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in write backends and read sources.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A property value or snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] refgraph_codec::CodecError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A node referenced by an operation does not exist.
    #[error("node not found: {id}")]
    NodeNotFound {
        /// The missing node.
        id: NodeId,
    },

    /// A single item slot that was expected to be set is empty.
    #[error("no item under key `{key}` of node {parent}")]
    ItemNotFound {
        /// The parent node.
        parent: NodeId,
        /// The item key.
        key: String,
    },

    /// A relationship index is out of range.
    #[error("relationship `{key}` of node {parent} has no index {index}")]
    RelationshipIndex {
        /// The parent node.
        parent: NodeId,
        /// The relationship key.
        key: String,
        /// The requested index.
        index: usize,
    },

    /// A node reference count would drop below zero.
    #[error("reference count underflow on node {id}")]
    RefCountUnderflow {
        /// The node whose count underflowed.
        id: NodeId,
    },

    /// Stored text is not a valid node identifier.
    #[error("invalid node id: {0}")]
    InvalidId(String),

    /// Stored data violates a structural invariant.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// The writer was closed and accepts no more work.
    #[error("writer is closed")]
    WriterClosed,

    /// A queued job panicked on the writer thread.
    #[error("queued job `{job}` panicked on the writer thread")]
    WorkerPanicked {
        /// Name of the job.
        job: &'static str,
    },

    /// The writer thread could not be started.
    #[error("failed to start writer thread: {0}")]
    WorkerSpawn(String),
}

impl StoreError {
    /// Creates a node not found error.
    pub fn node_not_found(id: NodeId) -> Self {
        Self::NodeNotFound { id }
    }

    /// Creates an item not found error.
    pub fn item_not_found(parent: NodeId, key: impl Into<String>) -> Self {
        Self::ItemNotFound {
            parent,
            key: key.into(),
        }
    }

    /// Creates a relationship index error.
    pub fn relationship_index(parent: NodeId, key: impl Into<String>, index: usize) -> Self {
        Self::RelationshipIndex {
            parent,
            key: key.into(),
            index,
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
