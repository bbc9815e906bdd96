//! Error types for the live object graph.

use refgraph_storage::NodeId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while saving or loading a live graph.
///
/// Lifetime bugs (releasing an unreferenced object, unregistering an unknown
/// observer, deleting an object that is still observed) are not errors; they
/// panic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Store(#[from] refgraph_storage::StoreError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] refgraph_codec::CodecError),

    /// A full write was requested on an object without a writer.
    #[error("object {id} has no writer attached")]
    WriterDetached {
        /// The object.
        id: NodeId,
    },

    /// No root node of the requested type exists.
    #[error("no root node of type `{type_tag}`")]
    RootNotFound {
        /// The requested type tag.
        type_tag: String,
    },

    /// A rebuilt object is not of the requested Rust type.
    #[error("node {id} has type `{found}`, expected {expected}")]
    TypeMismatch {
        /// The node.
        id: NodeId,
        /// The requested Rust type.
        expected: &'static str,
        /// The node's type tag.
        found: String,
    },

    /// The process-wide type registry has not been initialized.
    #[error("type registry is not initialized")]
    RegistryUninitialized,
}

impl CoreError {
    /// Creates a writer detached error.
    pub fn writer_detached(id: NodeId) -> Self {
        Self::WriterDetached { id }
    }

    /// Creates a root not found error.
    pub fn root_not_found(type_tag: impl Into<String>) -> Self {
        Self::RootNotFound {
            type_tag: type_tag.into(),
        }
    }
}
