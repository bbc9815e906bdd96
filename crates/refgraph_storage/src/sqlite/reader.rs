//! Relational read source.

use crate::error::StoreResult;
use crate::id::NodeId;
use crate::node::NodeMap;
use crate::source::NodeSource;
use crate::verify::{verify_node_map, Problem, VerifyReport};
use crate::sqlite::schema::{self, TableCounts};
use crate::sqlite::{dump, query};
use refgraph_codec::Value;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Raw read access to a graph stored by [`crate::SqliteWriter`].
pub struct SqliteReader {
    conn: Connection,
}

impl std::fmt::Debug for SqliteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteReader").finish_non_exhaustive()
    }
}

impl SqliteReader {
    /// Opens an existing store read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Loads a store from a SQL script produced by
    /// [`crate::SqliteWriter::dump`].
    ///
    /// # Errors
    ///
    /// Returns an error if the script does not execute.
    pub fn from_dump(script: &str) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(script)?;
        Ok(Self { conn })
    }

    /// Counts the rows of every table.
    ///
    /// # Errors
    ///
    /// Returns an error if a count fails.
    pub fn counts(&self) -> StoreResult<TableCounts> {
        schema::counts(&self.conn)
    }

    /// Loads the whole store as a node map.
    ///
    /// # Errors
    ///
    /// Returns an error if the tables cannot be read.
    pub fn to_node_map(&self) -> StoreResult<NodeMap> {
        query::load_node_map(&self.conn)
    }

    /// Renders the store as a SQL script.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be read.
    pub fn dump(&self) -> StoreResult<String> {
        dump::dump(&self.conn)
    }

    /// Checks the stored graph, including relationship index numbering.
    ///
    /// # Errors
    ///
    /// Returns an error if the tables cannot be read.
    pub fn verify(&self) -> StoreResult<VerifyReport> {
        let mut report = verify_node_map(&self.to_node_map()?);
        for (parent, key) in query::index_gaps(&self.conn)? {
            report.problems.push(Problem::IndexGap { parent, key });
        }
        Ok(report)
    }

    /// Returns `true` if the store predates the `items` table.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be queried.
    pub fn needs_migration(&self) -> StoreResult<bool> {
        Ok(!schema::has_table(&self.conn, "items")?)
    }

    /// Returns the raw `(item_index, item_id)` rows of one relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows cannot be read.
    pub fn relationship_rows(&self, parent: NodeId, key: &str) -> StoreResult<Vec<(i64, NodeId)>> {
        query::relationship_rows(&self.conn, parent, key)
    }
}

impl NodeSource for SqliteReader {
    fn find_root(&self, type_tag: &str) -> StoreResult<Option<NodeId>> {
        query::find_root(&self.conn, type_tag)
    }

    fn node_type(&self, id: NodeId) -> StoreResult<Option<String>> {
        query::node_type(&self.conn, id)
    }

    fn property(&self, id: NodeId, key: &str) -> StoreResult<Option<Value>> {
        query::property(&self.conn, id, key)
    }

    fn item(&self, parent: NodeId, key: &str) -> StoreResult<Option<NodeId>> {
        if !schema::has_table(&self.conn, "items")? {
            return Ok(None);
        }
        query::item(&self.conn, parent, key)
    }

    fn items(&self, parent: NodeId, key: &str) -> StoreResult<Vec<NodeId>> {
        query::members(&self.conn, parent, key)
    }

    fn data(&self, id: NodeId, key: &str) -> StoreResult<Option<Vec<u8>>> {
        query::data(&self.conn, id, key)
    }
}
