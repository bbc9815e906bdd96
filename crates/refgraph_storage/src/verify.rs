//! Structural checks over a persisted graph.

use crate::id::NodeId;
use crate::node::NodeMap;
use serde::Serialize;
use std::fmt;

/// One structural problem found in a stored graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    /// A node's stored count disagrees with the edges pointing at it.
    RefCountMismatch {
        /// The node.
        id: NodeId,
        /// Count stored on the node.
        stored: u32,
        /// Number of item and relationship slots holding the node.
        inbound: u32,
    },
    /// An item or relationship slot names a node that does not exist.
    DanglingReference {
        /// The node holding the slot.
        parent: NodeId,
        /// Item or relationship key.
        key: String,
        /// The missing node.
        target: NodeId,
    },
    /// A node was never given a type tag.
    Untyped {
        /// The node.
        id: NodeId,
    },
    /// A relationship key with no members.
    EmptyRelationship {
        /// The node holding the relationship.
        parent: NodeId,
        /// Relationship key.
        key: String,
    },
    /// Relationship rows are not numbered `0..n`.
    IndexGap {
        /// The node holding the relationship.
        parent: NodeId,
        /// Relationship key.
        key: String,
    },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RefCountMismatch {
                id,
                stored,
                inbound,
            } => write!(f, "node {id} stores refcount {stored} but has {inbound} inbound edges"),
            Self::DanglingReference {
                parent,
                key,
                target,
            } => write!(f, "node {parent} key `{key}` points at missing node {target}"),
            Self::Untyped { id } => write!(f, "node {id} has no type"),
            Self::EmptyRelationship { parent, key } => {
                write!(f, "node {parent} relationship `{key}` is empty")
            }
            Self::IndexGap { parent, key } => {
                write!(f, "node {parent} relationship `{key}` indices are not contiguous")
            }
        }
    }
}

/// Result of verifying a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Number of nodes checked.
    pub nodes: usize,
    /// Problems found, in node order.
    pub problems: Vec<Problem>,
}

impl VerifyReport {
    /// Returns `true` if no problems were found.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Checks ref counts against inbound edges and looks for dangling
/// references, untyped nodes and empty relationships.
pub fn verify_node_map(map: &NodeMap) -> VerifyReport {
    let inbound = map.inbound_edges();
    let mut problems = Vec::new();

    for (id, node) in map.iter() {
        let edges = inbound.get(id).copied().unwrap_or(0);
        if node.ref_count != edges {
            problems.push(Problem::RefCountMismatch {
                id: *id,
                stored: node.ref_count,
                inbound: edges,
            });
        }
        if node.type_tag.is_none() {
            problems.push(Problem::Untyped { id: *id });
        }

        let slots = node
            .items
            .iter()
            .chain(
                node.relationships
                    .iter()
                    .flat_map(|(key, members)| members.iter().map(move |target| (key, target))),
            );
        for (key, target) in slots {
            if !map.contains(target) {
                problems.push(Problem::DanglingReference {
                    parent: *id,
                    key: key.clone(),
                    target: *target,
                });
            }
        }

        for (key, members) in &node.relationships {
            if members.is_empty() {
                problems.push(Problem::EmptyRelationship {
                    parent: *id,
                    key: key.clone(),
                });
            }
        }
    }

    VerifyReport {
        nodes: map.len(),
        problems,
    }
}
