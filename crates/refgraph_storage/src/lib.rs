//! # refgraph storage
//!
//! Node model, write backends and read sources for refgraph.
//!
//! A live object graph is persisted as a set of [`Node`]s keyed by
//! [`NodeId`]. Each node counts the owning edges that point at it; when the
//! count drops to zero the node is deleted together with everything only it
//! owns.
//!
//! ## Design Principles
//!
//! - Writers see owned [`NodeRecord`] snapshots, never live objects
//! - Both write backends behave identically from the outside
//! - Relational relationship indices are always exactly `0..n`
//! - Writes can be moved to a worker thread without reordering
//!
//! ## Available Backends
//!
//! - [`InMemoryWriter`] - node map in memory, exportable as a CBOR snapshot
//! - [`SqliteWriter`] - five relational tables in SQLite
//! - [`AsyncWriter`] - runs any writer on a dedicated thread
//!
//! ## Example
//!
//! ```rust
//! use refgraph_storage::{NodeId, NodeRecord, NodeSource, SqliteReader, SqliteWriter, StorageWriter};
//!
//! let mut writer = SqliteWriter::open_in_memory().unwrap();
//! let root = NodeId::new();
//! writer.set_root(root).unwrap();
//! writer.set_type(root, "document").unwrap();
//!
//! let leaf = NodeRecord::new(NodeId::new(), "leaf").with_property("title", "first");
//! writer.insert_item(root, "children", &leaf, 0).unwrap();
//!
//! let reader = SqliteReader::from_dump(&writer.dump().unwrap()).unwrap();
//! assert_eq!(reader.find_root("document").unwrap(), Some(root));
//! assert_eq!(reader.items(root, "children").unwrap(), vec![leaf.id]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod id;
mod memory;
mod node;
mod proxy;
mod source;
pub mod sqlite;
pub mod verify;
mod writer;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use id::NodeId;
pub use memory::InMemoryWriter;
pub use node::{Node, NodeMap, NodeRecord};
pub use proxy::AsyncWriter;
pub use source::NodeSource;
pub use sqlite::{SqliteReader, SqliteWriter, TableCounts};
pub use verify::{verify_node_map, Problem, VerifyReport};
pub use writer::{shared, SharedWriter, StorageWriter};
