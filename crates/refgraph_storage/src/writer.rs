//! Storage writer trait definition.

use crate::error::StoreResult;
use crate::id::NodeId;
use crate::node::NodeRecord;
use parking_lot::Mutex;
use refgraph_codec::Value;
use std::sync::Arc;

/// A writer handle shared by every live object of one graph.
pub type SharedWriter = Arc<Mutex<dyn StorageWriter>>;

/// Wraps a writer into a [`SharedWriter`].
pub fn shared<W: StorageWriter + 'static>(writer: W) -> SharedWriter {
    Arc::new(Mutex::new(writer))
}

/// A backend that mirrors graph mutations into durable form.
///
/// Writers receive every mutation of an attached graph in the order it
/// happened on the owning thread. Children are handed over as owned
/// [`NodeRecord`] snapshots, so a writer never touches live objects and can
/// run on another thread.
///
/// # Invariants
///
/// - `set_item` and `insert_item` create the child node if it is absent and
///   populate it from the record; an existing node is only linked
/// - every link increments the child's ref count, every unlink decrements it
/// - a node whose count reaches zero is deleted together with everything only
///   it owns
/// - while disconnected, every mutating call is a no-op that succeeds
///
/// # Implementors
///
/// - [`crate::InMemoryWriter`] - node map in memory
/// - [`crate::SqliteWriter`] - relational tables in SQLite
/// - [`crate::AsyncWriter`] - queues calls for a writer on a worker thread
pub trait StorageWriter: Send {
    /// Starts a full rewrite: the store is emptied.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    fn begin_rewrite(&mut self) -> StoreResult<()>;

    /// Finishes a full rewrite.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewrite cannot be committed.
    fn end_rewrite(&mut self) -> StoreResult<()>;

    /// Declares `id` as a root, creating its node if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be created.
    fn set_root(&mut self, id: NodeId) -> StoreResult<()>;

    /// Sets the type tag of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or the write fails.
    fn set_type(&mut self, id: NodeId, type_tag: &str) -> StoreResult<()>;

    /// Sets a scalar property of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or the write fails.
    fn set_property(&mut self, id: NodeId, key: &str, value: &Value) -> StoreResult<()>;

    /// Links `item` as the single item `key` of `parent`.
    ///
    /// An item already linked under `key` is released first.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent does not exist or the write fails.
    fn set_item(&mut self, parent: NodeId, key: &str, item: &NodeRecord) -> StoreResult<()>;

    /// Unlinks the single item `key` of `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if no item is linked under `key`.
    fn clear_item(&mut self, parent: NodeId, key: &str) -> StoreResult<()>;

    /// Inserts `item` into relationship `key` of `parent` before position
    /// `before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent does not exist, `before` is past the
    /// end, or the write fails.
    fn insert_item(
        &mut self,
        parent: NodeId,
        key: &str,
        item: &NodeRecord,
        before: usize,
    ) -> StoreResult<()>;

    /// Removes the member at `index` from relationship `key` of `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no member at `index`.
    fn remove_item(&mut self, parent: NodeId, key: &str, index: usize) -> StoreResult<()>;

    /// Sets a binary data blob of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or the write fails.
    fn set_data(&mut self, id: NodeId, key: &str, data: &[u8]) -> StoreResult<()>;

    /// Returns `true` if mutating calls are currently ignored.
    fn is_disconnected(&self) -> bool;

    /// Turns the no-op mode on or off.
    fn set_disconnected(&mut self, disconnected: bool);

    /// Writes the full content of an existing node: properties, items, data
    /// and relationships in declaration order, then the type tag.
    ///
    /// # Errors
    ///
    /// Returns the first failing call's error.
    fn write_record(&mut self, record: &NodeRecord) -> StoreResult<()> {
        for (key, value) in &record.properties {
            self.set_property(record.id, key, value)?;
        }
        for (key, item) in &record.items {
            self.set_item(record.id, key, item)?;
        }
        for (key, data) in &record.data {
            self.set_data(record.id, key, data)?;
        }
        for (key, members) in &record.relationships {
            for (index, member) in members.iter().enumerate() {
                self.insert_item(record.id, key, member, index)?;
            }
        }
        if let Some(type_tag) = &record.type_tag {
            self.set_type(record.id, type_tag)?;
        }
        Ok(())
    }

    /// Waits until every accepted write has been applied.
    ///
    /// Synchronous writers apply writes immediately, so the default does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if pending writes cannot be awaited.
    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

impl<W: StorageWriter + ?Sized> StorageWriter for Box<W> {
    fn begin_rewrite(&mut self) -> StoreResult<()> {
        (**self).begin_rewrite()
    }

    fn end_rewrite(&mut self) -> StoreResult<()> {
        (**self).end_rewrite()
    }

    fn set_root(&mut self, id: NodeId) -> StoreResult<()> {
        (**self).set_root(id)
    }

    fn set_type(&mut self, id: NodeId, type_tag: &str) -> StoreResult<()> {
        (**self).set_type(id, type_tag)
    }

    fn set_property(&mut self, id: NodeId, key: &str, value: &Value) -> StoreResult<()> {
        (**self).set_property(id, key, value)
    }

    fn set_item(&mut self, parent: NodeId, key: &str, item: &NodeRecord) -> StoreResult<()> {
        (**self).set_item(parent, key, item)
    }

    fn clear_item(&mut self, parent: NodeId, key: &str) -> StoreResult<()> {
        (**self).clear_item(parent, key)
    }

    fn insert_item(
        &mut self,
        parent: NodeId,
        key: &str,
        item: &NodeRecord,
        before: usize,
    ) -> StoreResult<()> {
        (**self).insert_item(parent, key, item, before)
    }

    fn remove_item(&mut self, parent: NodeId, key: &str, index: usize) -> StoreResult<()> {
        (**self).remove_item(parent, key, index)
    }

    fn set_data(&mut self, id: NodeId, key: &str, data: &[u8]) -> StoreResult<()> {
        (**self).set_data(id, key, data)
    }

    fn is_disconnected(&self) -> bool {
        (**self).is_disconnected()
    }

    fn set_disconnected(&mut self, disconnected: bool) {
        (**self).set_disconnected(disconnected);
    }

    fn write_record(&mut self, record: &NodeRecord) -> StoreResult<()> {
        (**self).write_record(record)
    }

    fn flush(&mut self) -> StoreResult<()> {
        (**self).flush()
    }
}
