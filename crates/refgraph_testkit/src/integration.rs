//! Cross-crate integration test helpers.
//!
//! Provides a writer that feeds two backends at once and a check that a
//! live graph and its stored form agree.

use refgraph_codec::Value;
use refgraph_core::{ObjectRef, PersistentObject};
use refgraph_storage::{
    verify_node_map, NodeId, NodeMap, NodeRecord, StorageWriter, StoreResult,
};
use std::collections::{BTreeSet, HashSet};

/// Forwards every call to two writers, primary first.
///
/// Used to check that two backends end up with the same graph after the
/// same sequence of calls. An error from either side is returned.
pub struct MirrorWriter<A, B> {
    /// First writer.
    pub primary: A,
    /// Second writer.
    pub secondary: B,
}

impl<A: StorageWriter, B: StorageWriter> MirrorWriter<A, B> {
    /// Pairs two writers.
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }

    /// Splits the pair.
    pub fn into_inner(self) -> (A, B) {
        (self.primary, self.secondary)
    }
}

macro_rules! mirror {
    ($self:ident . $method:ident ( $($arg:expr),* )) => {{
        let first = $self.primary.$method($($arg),*);
        let second = $self.secondary.$method($($arg),*);
        first.and(second)
    }};
}

impl<A: StorageWriter, B: StorageWriter> StorageWriter for MirrorWriter<A, B> {
    fn begin_rewrite(&mut self) -> StoreResult<()> {
        mirror!(self.begin_rewrite())
    }

    fn end_rewrite(&mut self) -> StoreResult<()> {
        mirror!(self.end_rewrite())
    }

    fn set_root(&mut self, id: NodeId) -> StoreResult<()> {
        mirror!(self.set_root(id))
    }

    fn set_type(&mut self, id: NodeId, type_tag: &str) -> StoreResult<()> {
        mirror!(self.set_type(id, type_tag))
    }

    fn set_property(&mut self, id: NodeId, key: &str, value: &Value) -> StoreResult<()> {
        mirror!(self.set_property(id, key, value))
    }

    fn set_item(&mut self, parent: NodeId, key: &str, item: &NodeRecord) -> StoreResult<()> {
        mirror!(self.set_item(parent, key, item))
    }

    fn clear_item(&mut self, parent: NodeId, key: &str) -> StoreResult<()> {
        mirror!(self.clear_item(parent, key))
    }

    fn insert_item(
        &mut self,
        parent: NodeId,
        key: &str,
        item: &NodeRecord,
        before: usize,
    ) -> StoreResult<()> {
        mirror!(self.insert_item(parent, key, item, before))
    }

    fn remove_item(&mut self, parent: NodeId, key: &str, index: usize) -> StoreResult<()> {
        mirror!(self.remove_item(parent, key, index))
    }

    fn set_data(&mut self, id: NodeId, key: &str, data: &[u8]) -> StoreResult<()> {
        mirror!(self.set_data(id, key, data))
    }

    fn is_disconnected(&self) -> bool {
        self.primary.is_disconnected()
    }

    fn set_disconnected(&mut self, disconnected: bool) {
        self.primary.set_disconnected(disconnected);
        self.secondary.set_disconnected(disconnected);
    }

    fn flush(&mut self) -> StoreResult<()> {
        mirror!(self.flush())
    }
}

/// Collects every object reachable from `root`, root included, each once.
pub fn reachable(root: &dyn PersistentObject) -> Vec<ObjectRef> {
    let mut seen = HashSet::new();
    let mut objects = Vec::new();
    let mut pending = root.children();
    seen.insert(root.id());
    while let Some(object) = pending.pop() {
        if seen.insert(object.id()) {
            pending.extend(object.children());
            objects.push(object);
        }
    }
    objects
}

/// Asserts that `map` is exactly the stored form of the graph under `root`.
///
/// Checks that the map passes [`verify_node_map`], holds one node per live
/// object and nothing else, and that each node's type, ref count and
/// properties match the live object.
///
/// # Panics
///
/// Panics with a description of the first disagreement.
pub fn assert_consistent(root: &dyn PersistentObject, map: &NodeMap) {
    let report = verify_node_map(map);
    assert!(report.is_ok(), "stored graph has problems: {:?}", report.problems);

    let objects = reachable(root);
    let mut live: BTreeSet<NodeId> = objects.iter().map(|o| o.id()).collect();
    live.insert(root.id());
    let stored: BTreeSet<NodeId> = map.iter().map(|(id, _)| *id).collect();
    assert_eq!(live, stored, "live and stored node sets differ");

    let mut everything: Vec<&dyn PersistentObject> = vec![root];
    everything.extend(objects.iter().map(|object| object.as_object()));
    for object in everything {
        let id = object.id();
        let node = map
            .get(&id)
            .unwrap_or_else(|| panic!("object {id} not stored"));
        let declaration = object.declaration();
        assert_eq!(node.type_tag.as_deref(), Some(object.type_tag()), "type of {id}");
        assert_eq!(
            node.ref_count,
            object.ref_count(),
            "ref count of {id} ({})",
            object.type_tag()
        );
        for key in declaration.properties {
            assert_eq!(
                node.properties.get(key),
                object.get_storage_property(key).as_ref(),
                "property `{key}` of {id}"
            );
        }
        for key in declaration.items {
            let item = object.get_storage_item(key).map(|item| item.id());
            assert_eq!(node.items.get(key).copied(), item, "item `{key}` of {id}");
        }
        for key in declaration.relationships {
            let members: Vec<NodeId> = object
                .get_storage_relationship(key)
                .iter()
                .map(|member| member.id())
                .collect();
            let stored = node.relationships.get(key).cloned().unwrap_or_default();
            assert_eq!(stored, members, "relationship `{key}` of {id}");
        }
        for key in declaration.data {
            assert_eq!(
                node.data.get(key),
                object.get_storage_data(key).as_ref(),
                "data `{key}` of {id}"
            );
        }
    }
}
