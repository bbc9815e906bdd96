//! Inspect command implementation.

use super::Store;
use refgraph_storage::{Node, NodeId, TableCounts};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// `sqlite` or `snapshot`.
    pub kind: &'static str,
    /// Total number of nodes.
    pub node_count: usize,
    /// Table row counts (relational stores only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<TableCounts>,
    /// Unreferenced nodes and their types.
    pub roots: Vec<RootInfo>,
    /// Node count per type tag.
    pub types: BTreeMap<String, usize>,
    /// Full content of one node (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeInfo>,
}

/// One root node.
#[derive(Debug, Serialize)]
pub struct RootInfo {
    /// Node ID.
    pub id: String,
    /// Type tag, if set.
    pub type_tag: Option<String>,
}

/// One node's stored content.
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    /// Node ID.
    pub id: String,
    /// Stored content.
    #[serde(flatten)]
    pub node: Node,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    node: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(path)?;
    let result = inspect(path, &store, node)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result)?;
        }
    }

    Ok(())
}

/// Collects statistics about a store.
pub fn inspect(
    path: &Path,
    store: &Store,
    node: Option<&str>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let map = store.node_map()?;
    let roots = map
        .roots()
        .into_iter()
        .map(|id| RootInfo {
            id: id.to_string(),
            type_tag: map.get(&id).and_then(|n| n.type_tag.clone()),
        })
        .collect();

    let node = match node {
        Some(text) => {
            let id = NodeId::parse(text)?;
            let found = map
                .get(&id)
                .ok_or_else(|| format!("Node {} not found", id))?;
            Some(NodeInfo {
                id: id.to_string(),
                node: found.clone(),
            })
        }
        None => None,
    };

    Ok(InspectResult {
        path: path.display().to_string(),
        kind: store.kind(),
        node_count: map.len(),
        tables: store.counts()?,
        roots,
        types: map.type_counts(),
        node,
    })
}

fn print_text_output(result: &InspectResult) -> Result<(), Box<dyn std::error::Error>> {
    println!("refgraph Store Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!("Kind: {}", result.kind);
    println!("Nodes: {}", result.node_count);

    if let Some(tables) = &result.tables {
        println!();
        println!("Tables:");
        println!("  nodes:         {}", tables.nodes);
        println!("  properties:    {}", tables.properties);
        println!("  items:         {}", tables.items);
        println!("  relationships: {}", tables.relationships);
        println!("  data:          {}", tables.data);
    }

    println!();
    println!("Roots:");
    if result.roots.is_empty() {
        println!("  (none)");
    }
    for root in &result.roots {
        println!(
            "  {} [{}]",
            root.id,
            root.type_tag.as_deref().unwrap_or("untyped")
        );
    }

    println!();
    println!("Types:");
    for (type_tag, count) in &result.types {
        println!("  {:<20} {}", type_tag, count);
    }

    if let Some(info) = &result.node {
        println!();
        println!("Node {}:", info.id);
        println!("{}", serde_json::to_string_pretty(&info.node)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::saved_sample;
    use refgraph_core::PersistentObject;
    use refgraph_testkit::SAMPLE_NODE_COUNT;

    #[test]
    fn inspect_sqlite_store() {
        let saved = saved_sample();
        let store = Store::open(&saved.path).unwrap();
        let result = inspect(&saved.path, &store, None).unwrap();

        assert_eq!(result.kind, "sqlite");
        assert_eq!(result.node_count, SAMPLE_NODE_COUNT);
        assert_eq!(result.tables.unwrap().nodes, SAMPLE_NODE_COUNT as u64);
        assert_eq!(result.roots.len(), 1);
        assert_eq!(result.roots[0].type_tag.as_deref(), Some("document"));
        assert_eq!(result.types["data_item"], 5);
        assert_eq!(result.types["calibration"], 2);
    }

    #[test]
    fn inspect_single_node_as_json() {
        let saved = saved_sample();
        let store = Store::open(&saved.path).unwrap();
        let id = saved.sample.shared_calibration.id().to_string();
        let result = inspect(&saved.path, &store, Some(&id)).unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["node"]["id"], id);
        assert_eq!(json["node"]["ref_count"], 3);
        assert_eq!(json["node"]["type_tag"], "calibration");
    }

    #[test]
    fn unknown_node_is_an_error() {
        let saved = saved_sample();
        let store = Store::open(&saved.path).unwrap();
        let missing = NodeId::new().to_string();
        assert!(inspect(&saved.path, &store, Some(&missing)).is_err());
    }
}
