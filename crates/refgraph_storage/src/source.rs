//! Raw read access to a persisted graph.

use crate::error::StoreResult;
use crate::id::NodeId;
use crate::node::NodeMap;
use refgraph_codec::Value;

/// Read access to the nodes a writer produced.
///
/// Sources answer questions about single nodes. Missing nodes and missing
/// keys are `None` or empty, never errors; errors mean the source itself
/// could not be read.
///
/// # Implementors
///
/// - [`NodeMap`] - snapshots and in-memory stores
/// - [`crate::SqliteReader`] - relational stores
pub trait NodeSource {
    /// Returns the unreferenced node with the given type tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn find_root(&self, type_tag: &str) -> StoreResult<Option<NodeId>>;

    /// Returns a node's type tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn node_type(&self, id: NodeId) -> StoreResult<Option<String>>;

    /// Returns a scalar property.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or the value cannot be
    /// decoded.
    fn property(&self, id: NodeId, key: &str) -> StoreResult<Option<Value>>;

    /// Returns the ID linked as single item `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn item(&self, parent: NodeId, key: &str) -> StoreResult<Option<NodeId>>;

    /// Returns the members of relationship `key` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn items(&self, parent: NodeId, key: &str) -> StoreResult<Vec<NodeId>>;

    /// Returns a binary data blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn data(&self, id: NodeId, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Returns `true` if a single item is linked under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn has_item(&self, parent: NodeId, key: &str) -> StoreResult<bool> {
        Ok(self.item(parent, key)?.is_some())
    }

    /// Returns `true` if relationship `key` has members.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn has_relationship(&self, parent: NodeId, key: &str) -> StoreResult<bool> {
        Ok(!self.items(parent, key)?.is_empty())
    }

    /// Returns `true` if a data blob is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn has_data(&self, id: NodeId, key: &str) -> StoreResult<bool> {
        Ok(self.data(id, key)?.is_some())
    }
}

impl NodeSource for NodeMap {
    fn find_root(&self, type_tag: &str) -> StoreResult<Option<NodeId>> {
        Ok(self
            .iter()
            .find(|(_, node)| node.ref_count == 0 && node.type_tag.as_deref() == Some(type_tag))
            .map(|(id, _)| *id))
    }

    fn node_type(&self, id: NodeId) -> StoreResult<Option<String>> {
        Ok(self.get(&id).and_then(|node| node.type_tag.clone()))
    }

    fn property(&self, id: NodeId, key: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .get(&id)
            .and_then(|node| node.properties.get(key))
            .cloned())
    }

    fn item(&self, parent: NodeId, key: &str) -> StoreResult<Option<NodeId>> {
        Ok(self.get(&parent).and_then(|node| node.items.get(key)).copied())
    }

    fn items(&self, parent: NodeId, key: &str) -> StoreResult<Vec<NodeId>> {
        Ok(self
            .get(&parent)
            .and_then(|node| node.relationships.get(key))
            .cloned()
            .unwrap_or_default())
    }

    fn data(&self, id: NodeId, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.get(&id).and_then(|node| node.data.get(key)).cloned())
    }
}
