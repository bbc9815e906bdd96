//! Export command implementation.

use super::Store;
use std::path::Path;
use tracing::info;

/// Writes any store as a CBOR node-map snapshot.
pub fn run(path: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(path)?;
    let map = store.node_map()?;
    info!("Exporting {} nodes from {:?}", map.len(), path);
    map.save_file(output)?;
    println!("Exported {} nodes to {:?}", map.len(), output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::saved_sample;
    use refgraph_storage::NodeMap;
    use refgraph_testkit::{assert_consistent, load_document};

    #[test]
    fn export_round_trips_through_snapshot() {
        let saved = saved_sample();
        let output = saved._dir.path().join("graph.cbor");
        run(&saved.path, &output).unwrap();

        let map = NodeMap::load_file(&output).unwrap();
        assert_consistent(&*saved.sample.document, &map);
        let loaded = load_document(&map).unwrap();
        assert_eq!(loaded.item_count(), 5);

        let again = saved._dir.path().join("again.cbor");
        run(&output, &again).unwrap();
        assert_eq!(NodeMap::load_file(&again).unwrap(), map);
    }
}
