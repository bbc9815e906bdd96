//! Persisted node model.

use crate::error::StoreResult;
use crate::id::NodeId;
use refgraph_codec::{from_cbor, to_cbor, Value};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fs;
use std::path::Path;
use tracing::debug;

/// The persisted form of one object in the graph.
///
/// # Invariants
///
/// - `ref_count` equals the number of item slots and relationship slots,
///   across the whole graph, that hold this node's ID
/// - a node whose count drops to zero is removed together with everything
///   only it owns
/// - relationship lists are never empty; the key is dropped with the last
///   member
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Type tag, set once the object has been fully written.
    pub type_tag: Option<String>,
    /// Number of owning edges pointing at this node.
    pub ref_count: u32,
    /// Scalar properties.
    pub properties: BTreeMap<String, Value>,
    /// Single owned items.
    pub items: BTreeMap<String, NodeId>,
    /// Ordered owned relationships.
    pub relationships: BTreeMap<String, Vec<NodeId>>,
    /// Binary data blobs.
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Node {
    /// Returns every outgoing owning edge: items first, then relationship
    /// members in order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.items
            .values()
            .copied()
            .chain(self.relationships.values().flatten().copied())
    }
}

/// All nodes of a graph keyed by ID.
///
/// This is the in-memory backend's store and also the snapshot format: a
/// whole map can be exported to, and imported from, one CBOR byte stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeMap {
    nodes: BTreeMap<NodeId, Node>,
}

impl NodeMap {
    /// Creates an empty node map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node with the given ID.
    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Returns the node with the given ID mutably.
    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Returns `true` if the node exists.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns the existing node or inserts an empty one.
    ///
    /// The flag is `true` when the node was created by this call.
    pub fn get_or_create(&mut self, id: NodeId) -> (&mut Node, bool) {
        match self.nodes.entry(id) {
            btree_map::Entry::Occupied(entry) => (entry.into_mut(), false),
            btree_map::Entry::Vacant(entry) => (entry.insert(Node::default()), true),
        }
    }

    /// Inserts or replaces a node.
    pub fn insert(&mut self, id: NodeId, node: Node) -> Option<Node> {
        self.nodes.insert(id, node)
    }

    /// Removes a node.
    pub fn remove(&mut self, id: &NodeId) -> Option<Node> {
        self.nodes.remove(id)
    }

    /// Removes every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all nodes in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Returns the IDs of nodes nothing points at.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.ref_count == 0)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Counts inbound owning edges per node, as implied by the stored items
    /// and relationships.
    ///
    /// Dangling targets are counted too, so the result can be compared with
    /// each node's `ref_count`.
    pub fn inbound_edges(&self) -> BTreeMap<NodeId, u32> {
        let mut counts = BTreeMap::new();
        for node in self.nodes.values() {
            for child in node.children() {
                *counts.entry(child).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Number of nodes per type tag. Untyped nodes count under `""`.
    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for node in self.nodes.values() {
            let tag = node.type_tag.clone().unwrap_or_default();
            *counts.entry(tag).or_insert(0) += 1;
        }
        counts
    }

    /// Writes every node to the debug log.
    pub fn log(&self) {
        for (id, node) in &self.nodes {
            debug!(%id, ?node, "node");
        }
    }

    /// Encodes the whole map as one CBOR blob.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes a map previously produced by [`NodeMap::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a node map.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        Ok(from_cbor(bytes)?)
    }

    /// Saves the snapshot to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn save_file(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Loads a snapshot from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or decoding fails.
    pub fn load_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

impl FromIterator<(NodeId, Node)> for NodeMap {
    fn from_iter<I: IntoIterator<Item = (NodeId, Node)>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// An owned snapshot of a live object and the subtree it owns.
///
/// Live objects are not `Send`, so they hand writers this record instead of
/// themselves. Fields are listed in the order the object declares them, which
/// is the order writers apply them in.
///
/// A record that only names `id` (no type, no content) refers to a node that
/// was already described earlier in the same traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Node ID.
    pub id: NodeId,
    /// Type tag.
    pub type_tag: Option<String>,
    /// Properties that currently have a value.
    pub properties: Vec<(String, Value)>,
    /// Single items that are currently set.
    pub items: Vec<(String, NodeRecord)>,
    /// Binary data that is currently present.
    pub data: Vec<(String, Vec<u8>)>,
    /// Relationships with their members in order.
    pub relationships: Vec<(String, Vec<NodeRecord>)>,
}

impl NodeRecord {
    /// Creates an empty record of the given type.
    pub fn new(id: NodeId, type_tag: impl Into<String>) -> Self {
        Self {
            id,
            type_tag: Some(type_tag.into()),
            properties: Vec::new(),
            items: Vec::new(),
            data: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Creates a record that only refers to an already described node.
    pub fn reference(id: NodeId) -> Self {
        Self {
            id,
            type_tag: None,
            properties: Vec::new(),
            items: Vec::new(),
            data: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Adds a single item.
    #[must_use]
    pub fn with_item(mut self, key: impl Into<String>, item: NodeRecord) -> Self {
        self.items.push((key.into(), item));
        self
    }

    /// Adds a data blob.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, data: Vec<u8>) -> Self {
        self.data.push((key.into(), data));
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn with_relationship(mut self, key: impl Into<String>, members: Vec<NodeRecord>) -> Self {
        self.relationships.push((key.into(), members));
        self
    }

    /// Number of records in this subtree, this one included.
    pub fn subtree_len(&self) -> usize {
        1 + self
            .items
            .iter()
            .map(|(_, item)| item.subtree_len())
            .sum::<usize>()
            + self
                .relationships
                .iter()
                .flat_map(|(_, members)| members)
                .map(NodeRecord::subtree_len)
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> (NodeMap, NodeId, NodeId, NodeId) {
        let root = NodeId::new();
        let a = NodeId::new();
        let b = NodeId::new();
        let mut map = NodeMap::new();

        let mut root_node = Node {
            type_tag: Some("document".into()),
            ..Node::default()
        };
        root_node.relationships.insert("children".into(), vec![a, b]);
        root_node.items.insert("cover".into(), b);
        map.insert(root, root_node);

        map.insert(
            a,
            Node {
                type_tag: Some("leaf".into()),
                ref_count: 1,
                ..Node::default()
            },
        );
        let mut b_node = Node {
            type_tag: Some("leaf".into()),
            ref_count: 2,
            ..Node::default()
        };
        b_node.properties.insert("title".into(), Value::from("b"));
        b_node.data.insert("raw".into(), vec![1, 2, 3]);
        map.insert(b, b_node);

        (map, root, a, b)
    }

    #[test]
    fn get_or_create_reports_creation() {
        let mut map = NodeMap::new();
        let id = NodeId::new();
        assert!(map.get_or_create(id).1);
        assert!(!map.get_or_create(id).1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn roots_are_unreferenced_nodes() {
        let (map, root, _, _) = sample_map();
        assert_eq!(map.roots(), vec![root]);
    }

    #[test]
    fn inbound_edges_match_ref_counts() {
        let (map, root, a, b) = sample_map();
        let inbound = map.inbound_edges();
        assert_eq!(inbound.get(&a), Some(&1));
        assert_eq!(inbound.get(&b), Some(&2));
        assert_eq!(inbound.get(&root), None);
    }

    #[test]
    fn type_counts() {
        let (map, _, _, _) = sample_map();
        let counts = map.type_counts();
        assert_eq!(counts.get("leaf"), Some(&2));
        assert_eq!(counts.get("document"), Some(&1));
    }

    #[test]
    fn snapshot_bytes_roundtrip() {
        let (map, _, _, _) = sample_map();
        let bytes = map.to_bytes().unwrap();
        assert_eq!(NodeMap::from_bytes(&bytes).unwrap(), map);
    }

    #[test]
    fn snapshot_file_roundtrip() {
        let (map, _, _, _) = sample_map();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");
        map.save_file(&path).unwrap();
        assert_eq!(NodeMap::load_file(&path).unwrap(), map);
    }

    #[test]
    fn record_subtree_len_counts_nested_members() {
        let record = NodeRecord::new(NodeId::new(), "group")
            .with_item("cover", NodeRecord::new(NodeId::new(), "leaf"))
            .with_relationship(
                "children",
                vec![
                    NodeRecord::new(NodeId::new(), "leaf"),
                    NodeRecord::new(NodeId::new(), "group")
                        .with_relationship("children", vec![NodeRecord::reference(NodeId::new())]),
                ],
            );
        assert_eq!(record.subtree_len(), 5);
    }
}
