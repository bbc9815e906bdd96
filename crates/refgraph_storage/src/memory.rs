//! In-memory write backend.

use crate::error::{StoreError, StoreResult};
use crate::id::NodeId;
use crate::node::{Node, NodeMap, NodeRecord};
use crate::writer::StorageWriter;
use refgraph_codec::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// A write backend that keeps the node graph in a [`NodeMap`].
///
/// This backend is suitable for:
/// - Unit and integration tests
/// - Sessions that persist by exporting a snapshot
///
/// # Example
///
/// ```rust
/// use refgraph_storage::{InMemoryWriter, NodeId, NodeRecord, StorageWriter};
///
/// let mut writer = InMemoryWriter::new();
/// let root = NodeId::new();
/// writer.set_root(root).unwrap();
///
/// let child = NodeRecord::new(NodeId::new(), "leaf").with_property("title", "a");
/// writer.insert_item(root, "children", &child, 0).unwrap();
///
/// assert_eq!(writer.find_node(&child.id).unwrap().ref_count, 1);
/// writer.remove_item(root, "children", 0).unwrap();
/// assert!(writer.find_node(&child.id).is_none());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryWriter {
    nodes: NodeMap,
    disconnected: bool,
}

impl InMemoryWriter {
    /// Creates a new empty in-memory writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer that continues from an existing node map.
    #[must_use]
    pub fn with_node_map(nodes: NodeMap) -> Self {
        Self {
            nodes,
            disconnected: false,
        }
    }

    /// Returns the stored nodes.
    pub fn node_map(&self) -> &NodeMap {
        &self.nodes
    }

    /// Consumes the writer and returns the stored nodes.
    pub fn into_node_map(self) -> NodeMap {
        self.nodes
    }

    /// Returns the stored node with the given ID.
    pub fn find_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Saves the stored nodes as a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn save_file(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        self.nodes.save_file(path)
    }

    /// Writes every stored node to the debug log.
    pub fn log(&self) {
        self.nodes.log();
    }

    fn node_mut(&mut self, id: NodeId) -> StoreResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::node_not_found(id))
    }

    /// Creates the node for `record` if absent and populates it.
    fn ensure_node(&mut self, record: &NodeRecord) -> StoreResult<()> {
        let (_, created) = self.nodes.get_or_create(record.id);
        if created {
            self.write_record(record)?;
        }
        Ok(())
    }

    fn add_ref(&mut self, id: NodeId) -> StoreResult<()> {
        let node = self.node_mut(id)?;
        node.ref_count += 1;
        Ok(())
    }

    /// Plans dropping one reference to `id`: which nodes lose references and
    /// which become unreferenced and go. Nothing is changed, so a failed
    /// plan leaves the map as it was.
    fn plan_release(&self, id: NodeId) -> StoreResult<Cascade> {
        if !self.nodes.contains(&id) {
            return Err(StoreError::node_not_found(id));
        }

        let mut cascade = Cascade::default();
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if cascade.deleted.contains(&id) {
                warn!(%id, "reference to deleted node during cascade");
                continue;
            }
            let Some(node) = self.nodes.get(&id) else {
                warn!(%id, "dangling reference during cascade");
                continue;
            };
            let released = cascade.released.entry(id).or_insert(0);
            *released += 1;
            if *released > node.ref_count {
                return Err(StoreError::RefCountUnderflow { id });
            }
            if *released == node.ref_count {
                cascade.deleted.insert(id);
                pending.extend(node.children());
            }
        }
        Ok(cascade)
    }

    fn apply(&mut self, cascade: Cascade) {
        for (id, released) in cascade.released {
            if cascade.deleted.contains(&id) {
                if let Some(node) = self.nodes.remove(&id) {
                    debug!(%id, type_tag = ?node.type_tag, "node deleted");
                }
            } else if let Some(node) = self.nodes.get_mut(&id) {
                node.ref_count -= released;
            }
        }
    }
}

/// Reference drops and deletions of one planned release.
#[derive(Debug, Default)]
struct Cascade {
    released: BTreeMap<NodeId, u32>,
    deleted: BTreeSet<NodeId>,
}

impl StorageWriter for InMemoryWriter {
    fn begin_rewrite(&mut self) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.nodes.clear();
        Ok(())
    }

    fn end_rewrite(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn set_root(&mut self, id: NodeId) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.nodes.get_or_create(id);
        Ok(())
    }

    fn set_type(&mut self, id: NodeId, type_tag: &str) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.node_mut(id)?.type_tag = Some(type_tag.to_string());
        Ok(())
    }

    fn set_property(&mut self, id: NodeId, key: &str, value: &Value) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.node_mut(id)?
            .properties
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn set_item(&mut self, parent: NodeId, key: &str, item: &NodeRecord) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        let previous = self.node_mut(parent)?.items.get(key).copied();
        if previous == Some(item.id) {
            return Ok(());
        }

        self.ensure_node(item)?;
        self.node_mut(parent)?
            .items
            .insert(key.to_string(), item.id);
        self.add_ref(item.id)?;

        let Some(previous) = previous else {
            return Ok(());
        };
        match self.plan_release(previous) {
            Ok(cascade) => {
                self.apply(cascade);
                Ok(())
            }
            Err(e) => {
                self.node_mut(parent)?
                    .items
                    .insert(key.to_string(), previous);
                let undo = self.plan_release(item.id)?;
                self.apply(undo);
                Err(e)
            }
        }
    }

    fn clear_item(&mut self, parent: NodeId, key: &str) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        let item = self
            .node_mut(parent)?
            .items
            .get(key)
            .copied()
            .ok_or_else(|| StoreError::item_not_found(parent, key))?;
        let cascade = self.plan_release(item)?;
        self.node_mut(parent)?.items.remove(key);
        self.apply(cascade);
        Ok(())
    }

    fn insert_item(
        &mut self,
        parent: NodeId,
        key: &str,
        item: &NodeRecord,
        before: usize,
    ) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        let len = self
            .node_mut(parent)?
            .relationships
            .get(key)
            .map_or(0, Vec::len);
        if before > len {
            return Err(StoreError::relationship_index(parent, key, before));
        }

        self.ensure_node(item)?;
        self.node_mut(parent)?
            .relationships
            .entry(key.to_string())
            .or_default()
            .insert(before, item.id);
        self.add_ref(item.id)
    }

    fn remove_item(&mut self, parent: NodeId, key: &str, index: usize) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        let item = self
            .node_mut(parent)?
            .relationships
            .get(key)
            .and_then(|members| members.get(index))
            .copied()
            .ok_or_else(|| StoreError::relationship_index(parent, key, index))?;
        let cascade = self.plan_release(item)?;

        let node = self.node_mut(parent)?;
        if let Some(members) = node.relationships.get_mut(key) {
            members.remove(index);
            if members.is_empty() {
                node.relationships.remove(key);
            }
        }
        self.apply(cascade);
        Ok(())
    }

    fn set_data(&mut self, id: NodeId, key: &str, data: &[u8]) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.node_mut(id)?
            .data
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn set_disconnected(&mut self, disconnected: bool) {
        self.disconnected = disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(title: &str) -> NodeRecord {
        NodeRecord::new(NodeId::new(), "leaf").with_property("title", title)
    }

    fn writer_with_root() -> (InMemoryWriter, NodeId) {
        let mut writer = InMemoryWriter::new();
        let root = NodeId::new();
        writer.set_root(root).unwrap();
        writer.set_type(root, "document").unwrap();
        (writer, root)
    }

    fn members(writer: &InMemoryWriter, parent: NodeId, key: &str) -> Vec<NodeId> {
        writer
            .find_node(&parent)
            .unwrap()
            .relationships
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    #[test]
    fn memory_new_is_empty() {
        let writer = InMemoryWriter::new();
        assert!(writer.node_map().is_empty());
        assert!(!writer.is_disconnected());
    }

    #[test]
    fn memory_insert_populates_child() {
        let (mut writer, root) = writer_with_root();
        let child = leaf("a").with_data("raw", vec![9, 8]);
        writer.insert_item(root, "children", &child, 0).unwrap();

        let node = writer.find_node(&child.id).unwrap();
        assert_eq!(node.type_tag.as_deref(), Some("leaf"));
        assert_eq!(node.ref_count, 1);
        assert_eq!(node.properties.get("title"), Some(&Value::from("a")));
        assert_eq!(node.data.get("raw"), Some(&vec![9, 8]));
    }

    #[test]
    fn memory_insert_respects_position() {
        let (mut writer, root) = writer_with_root();
        let (a, b, c) = (leaf("a"), leaf("b"), leaf("c"));
        writer.insert_item(root, "children", &a, 0).unwrap();
        writer.insert_item(root, "children", &b, 0).unwrap();
        writer.insert_item(root, "children", &c, 1).unwrap();
        assert_eq!(members(&writer, root, "children"), vec![b.id, c.id, a.id]);
    }

    #[test]
    fn memory_insert_past_end_fails() {
        let (mut writer, root) = writer_with_root();
        let result = writer.insert_item(root, "children", &leaf("a"), 1);
        assert!(matches!(result, Err(StoreError::RelationshipIndex { .. })));
        assert_eq!(writer.node_map().len(), 1);
    }

    #[test]
    fn memory_remove_last_member_drops_key() {
        let (mut writer, root) = writer_with_root();
        let child = leaf("a");
        writer.insert_item(root, "children", &child, 0).unwrap();
        writer.remove_item(root, "children", 0).unwrap();
        assert!(writer.find_node(&root).unwrap().relationships.is_empty());
        assert!(writer.find_node(&child.id).is_none());
    }

    #[test]
    fn memory_remove_out_of_range_fails() {
        let (mut writer, root) = writer_with_root();
        let result = writer.remove_item(root, "children", 0);
        assert!(matches!(result, Err(StoreError::RelationshipIndex { .. })));
    }

    #[test]
    fn memory_shared_node_survives_partial_release() {
        let (mut writer, root) = writer_with_root();
        let shared = leaf("shared");
        writer.insert_item(root, "children", &shared, 0).unwrap();
        writer
            .insert_item(root, "children", &NodeRecord::reference(shared.id), 1)
            .unwrap();
        assert_eq!(writer.find_node(&shared.id).unwrap().ref_count, 2);

        writer.remove_item(root, "children", 0).unwrap();
        let node = writer.find_node(&shared.id).unwrap();
        assert_eq!(node.ref_count, 1);
        assert_eq!(node.properties.get("title"), Some(&Value::from("shared")));
    }

    #[test]
    fn memory_cascade_removes_subtree_only() {
        let (mut writer, root) = writer_with_root();
        let kept = leaf("kept");
        let grandchild = leaf("grandchild");
        let child = NodeRecord::new(NodeId::new(), "group")
            .with_item("cover", NodeRecord::new(NodeId::new(), "cover"))
            .with_relationship("children", vec![grandchild.clone(), kept.clone()]);

        writer.insert_item(root, "kept", &kept, 0).unwrap();
        writer.insert_item(root, "groups", &child, 0).unwrap();
        assert_eq!(writer.node_map().len(), 5);
        assert_eq!(writer.find_node(&kept.id).unwrap().ref_count, 2);

        writer.remove_item(root, "groups", 0).unwrap();
        assert_eq!(writer.node_map().len(), 2);
        assert!(writer.find_node(&grandchild.id).is_none());
        assert_eq!(writer.find_node(&kept.id).unwrap().ref_count, 1);
    }

    #[test]
    fn memory_deep_chain_cascade() {
        let (mut writer, root) = writer_with_root();
        let mut chain = leaf("tail");
        for depth in 0..300 {
            chain = NodeRecord::new(NodeId::new(), "link")
                .with_property("depth", depth)
                .with_item("next", chain);
        }
        writer.set_item(root, "chain", &chain).unwrap();
        assert_eq!(writer.node_map().len(), 302);

        writer.clear_item(root, "chain").unwrap();
        assert_eq!(writer.node_map().len(), 1);
    }

    #[test]
    fn memory_set_item_replaces_previous() {
        let (mut writer, root) = writer_with_root();
        let first = leaf("first");
        let second = leaf("second");
        writer.set_item(root, "cover", &first).unwrap();
        writer.set_item(root, "cover", &second).unwrap();

        assert!(writer.find_node(&first.id).is_none());
        assert_eq!(writer.find_node(&root).unwrap().items.get("cover"), Some(&second.id));
        assert_eq!(writer.find_node(&second.id).unwrap().ref_count, 1);
    }

    /// A root holding `group` (as item `cover` and as the only member of
    /// `groups`) whose child `a` claims no references.
    fn writer_with_broken_subtree() -> (InMemoryWriter, NodeId, NodeRecord) {
        let (mut writer, root) = writer_with_root();
        let a = leaf("a");
        let group = NodeRecord::new(NodeId::new(), "group")
            .with_relationship("children", vec![a.clone(), leaf("b")]);
        writer.set_item(root, "cover", &group).unwrap();
        writer
            .insert_item(root, "groups", &NodeRecord::reference(group.id), 0)
            .unwrap();
        writer.nodes.get_mut(&a.id).unwrap().ref_count = 0;
        (writer, root, group)
    }

    #[test]
    fn memory_failed_clear_leaves_graph_unchanged() {
        let (mut writer, root, _) = writer_with_broken_subtree();
        writer.remove_item(root, "groups", 0).unwrap();
        let before = writer.node_map().clone();

        let result = writer.clear_item(root, "cover");
        assert!(matches!(result, Err(StoreError::RefCountUnderflow { .. })));
        assert_eq!(writer.node_map(), &before);
    }

    #[test]
    fn memory_failed_remove_leaves_graph_unchanged() {
        let (mut writer, root, group) = writer_with_broken_subtree();
        writer.clear_item(root, "cover").unwrap();
        let before = writer.node_map().clone();

        let result = writer.remove_item(root, "groups", 0);
        assert!(matches!(result, Err(StoreError::RefCountUnderflow { .. })));
        assert_eq!(writer.node_map(), &before);
        assert_eq!(members(&writer, root, "groups"), vec![group.id]);
    }

    #[test]
    fn memory_failed_replace_restores_previous_item() {
        let (mut writer, root, group) = writer_with_broken_subtree();
        writer.remove_item(root, "groups", 0).unwrap();
        let before = writer.node_map().clone();

        let replacement = leaf("replacement")
            .with_relationship("children", vec![leaf("nested")]);
        let result = writer.set_item(root, "cover", &replacement);
        assert!(matches!(result, Err(StoreError::RefCountUnderflow { .. })));
        assert_eq!(writer.node_map(), &before);
        assert_eq!(writer.find_node(&root).unwrap().items.get("cover"), Some(&group.id));
        assert!(writer.find_node(&replacement.id).is_none());
    }

    #[test]
    fn memory_clear_missing_item_fails() {
        let (mut writer, root) = writer_with_root();
        let result = writer.clear_item(root, "cover");
        assert!(matches!(result, Err(StoreError::ItemNotFound { .. })));
    }

    #[test]
    fn memory_missing_parent_fails() {
        let mut writer = InMemoryWriter::new();
        let result = writer.set_property(NodeId::new(), "title", &Value::from("x"));
        assert!(matches!(result, Err(StoreError::NodeNotFound { .. })));
    }

    #[test]
    fn memory_disconnected_ignores_writes() {
        let (mut writer, root) = writer_with_root();
        writer.set_disconnected(true);
        writer.insert_item(root, "children", &leaf("a"), 0).unwrap();
        writer.set_property(root, "title", &Value::from("x")).unwrap();
        writer.begin_rewrite().unwrap();
        assert_eq!(writer.node_map().len(), 1);

        writer.set_disconnected(false);
        writer.set_property(root, "title", &Value::from("x")).unwrap();
        assert!(writer.find_node(&root).unwrap().properties.contains_key("title"));
    }

    #[test]
    fn memory_rewrite_starts_empty() {
        let (mut writer, root) = writer_with_root();
        writer.insert_item(root, "children", &leaf("a"), 0).unwrap();
        writer.begin_rewrite().unwrap();
        assert!(writer.node_map().is_empty());
        writer.set_root(root).unwrap();
        writer.end_rewrite().unwrap();
        assert_eq!(writer.node_map().roots(), vec![root]);
    }
}
