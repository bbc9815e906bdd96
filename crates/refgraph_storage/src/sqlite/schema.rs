//! Relational schema and migrations.

use crate::error::StoreResult;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

/// Graph tables in the order they are created.
pub const TABLES: [&str; 5] = ["nodes", "properties", "data", "relationships", "items"];

const CREATE_NODES: &str =
    "CREATE TABLE IF NOT EXISTS nodes(id TEXT, type TEXT, refcount INTEGER, PRIMARY KEY(id))";
const CREATE_PROPERTIES: &str =
    "CREATE TABLE IF NOT EXISTS properties(id TEXT, key TEXT, value BLOB, PRIMARY KEY(id, key))";
const CREATE_DATA: &str =
    "CREATE TABLE IF NOT EXISTS data(id TEXT, key TEXT, value BLOB, PRIMARY KEY(id, key))";
const CREATE_RELATIONSHIPS: &str = "CREATE TABLE IF NOT EXISTS relationships(parent_id TEXT, key TEXT, item_index INTEGER, item_id TEXT, PRIMARY KEY(parent_id, key, item_index))";
const CREATE_ITEMS: &str = "CREATE TABLE IF NOT EXISTS items(parent_id TEXT, key TEXT, item_id TEXT, PRIMARY KEY(parent_id, key))";

/// Creates every graph table that does not exist yet.
///
/// # Errors
///
/// Returns an error if a statement fails.
pub fn create(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(&format!(
        "BEGIN;\n{CREATE_NODES};\n{CREATE_PROPERTIES};\n{CREATE_DATA};\n{CREATE_RELATIONSHIPS};\n{CREATE_ITEMS};\nCOMMIT;"
    ))?;
    Ok(())
}

/// Returns `true` if a table with the given name exists.
///
/// # Errors
///
/// Returns an error if the catalog cannot be queried.
pub fn has_table(conn: &Connection, name: &str) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Brings an older store up to date.
///
/// Stores written before single items were persisted have no `items` table;
/// it is created and nothing else is touched. Returns `true` if the table was
/// added.
///
/// # Errors
///
/// Returns an error if the catalog cannot be queried or the table cannot be
/// created.
pub fn migrate(conn: &Connection) -> StoreResult<bool> {
    if has_table(conn, "items")? {
        return Ok(false);
    }
    conn.execute(CREATE_ITEMS, [])?;
    info!("created missing items table");
    Ok(true)
}

/// Row counts of the graph tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    /// Rows in `nodes`.
    pub nodes: u64,
    /// Rows in `properties`.
    pub properties: u64,
    /// Rows in `data`.
    pub data: u64,
    /// Rows in `relationships`.
    pub relationships: u64,
    /// Rows in `items`.
    pub items: u64,
}

/// Counts the rows of every graph table.
///
/// A missing `items` table counts as empty.
///
/// # Errors
///
/// Returns an error if a count query fails.
pub fn counts(conn: &Connection) -> StoreResult<TableCounts> {
    let count = |table: &str| -> StoreResult<u64> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(u64::try_from(n).unwrap_or(0))
    };
    Ok(TableCounts {
        nodes: count("nodes")?,
        properties: count("properties")?,
        data: count("data")?,
        relationships: count("relationships")?,
        items: if has_table(conn, "items")? {
            count("items")?
        } else {
            0
        },
    })
}
