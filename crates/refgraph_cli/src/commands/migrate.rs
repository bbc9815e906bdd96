//! Migrate command implementation.

use refgraph_storage::{SqliteReader, SqliteWriter, StoreConfig};
use std::path::Path;
use tracing::info;

/// Runs the additive schema migration on a relational store.
///
/// Returns `true` if the store was changed.
pub fn run(path: &Path, dry_run: bool) -> Result<bool, Box<dyn std::error::Error>> {
    if super::is_snapshot(path) {
        return Err("Snapshots have no schema to migrate".into());
    }
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }

    let pending = SqliteReader::open(path)?.needs_migration()?;
    if !pending {
        println!("Store is up to date");
        return Ok(false);
    }
    if dry_run {
        println!("Would create table `items`");
        return Ok(false);
    }

    info!("Migrating {:?}", path);
    let writer = SqliteWriter::open(path, &StoreConfig::new().create_if_missing(false))?;
    let counts = writer.counts()?;
    println!("Created table `items` ({} nodes untouched)", counts.nodes);
    Ok(true)
}
