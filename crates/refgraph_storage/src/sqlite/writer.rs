//! Relational write backend.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::id::NodeId;
use crate::node::{Node, NodeMap, NodeRecord};
use crate::sqlite::schema::{self, TableCounts};
use crate::sqlite::{dump, query};
use crate::writer::StorageWriter;
use refgraph_codec::{encode_value, Value};
use rusqlite::{params, Connection, OpenFlags, Params};
use std::path::Path;
use tracing::{debug, warn};

/// A write backend that stores the graph in SQLite tables.
///
/// Every mutating call runs in its own transaction. Between
/// [`StorageWriter::begin_rewrite`] and [`StorageWriter::end_rewrite`] all
/// calls share one transaction that commits at the end.
///
/// Relationship members are rows keyed by `(parent_id, key, item_index)`.
/// Inserting or removing a member renumbers its siblings in two passes
/// through negative indices, so no intermediate state holds two rows with
/// the same key.
pub struct SqliteWriter {
    conn: Connection,
    disconnected: bool,
    in_rewrite: bool,
    log_statements: bool,
}

impl std::fmt::Debug for SqliteWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWriter")
            .field("disconnected", &self.disconnected)
            .field("in_rewrite", &self.in_rewrite)
            .finish_non_exhaustive()
    }
}

impl SqliteWriter {
    /// Opens the store at `path`.
    ///
    /// With `create_if_missing` the file and schema are created as needed;
    /// otherwise the file must already exist. The additive migration runs in
    /// both cases.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or prepared.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> StoreResult<Self> {
        let flags = if config.create_if_missing {
            OpenFlags::default()
        } else {
            OpenFlags::default().difference(OpenFlags::SQLITE_OPEN_CREATE)
        };
        let conn = Connection::open_with_flags(path.as_ref(), flags)?;
        Self::with_connection(conn, config)
    }

    /// Opens a fresh store in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, &StoreConfig::default())
    }

    /// Wraps an open connection.
    ///
    /// # Errors
    ///
    /// Returns an error if a pragma, the schema, or the migration fails.
    pub fn with_connection(conn: Connection, config: &StoreConfig) -> StoreResult<Self> {
        conn.pragma_update(
            None,
            "synchronous",
            if config.sync_on_commit { "FULL" } else { "OFF" },
        )?;
        if config.wal_mode {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(%mode, "journal mode");
        }

        let writer = Self {
            conn,
            disconnected: false,
            in_rewrite: false,
            log_statements: config.log_statements,
        };
        if config.create_if_missing {
            writer.create()?;
        }
        writer.migrate()?;
        Ok(writer)
    }

    /// Creates every graph table that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn create(&self) -> StoreResult<()> {
        schema::create(&self.conn)
    }

    /// Runs the additive migration. Returns `true` if the store changed.
    ///
    /// Runs whether or not the writer is disconnected.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration fails.
    pub fn migrate(&self) -> StoreResult<bool> {
        schema::migrate(&self.conn)
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Loads one stored node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node's rows cannot be read.
    pub fn find_node(&self, id: NodeId) -> StoreResult<Option<Node>> {
        query::load_node(&self.conn, id)
    }

    /// Returns the raw `(item_index, item_id)` rows of one relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows cannot be read.
    pub fn relationship_rows(&self, parent: NodeId, key: &str) -> StoreResult<Vec<(i64, NodeId)>> {
        query::relationship_rows(&self.conn, parent, key)
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
    /// Returns an error if the tables cannot be read.
    pub fn dump(&self) -> StoreResult<String> {
        dump::dump(&self.conn)
    }

    /// Runs `f` as one unit of work.
    fn unit<T>(&mut self, f: impl FnOnce(&Statements<'_>) -> StoreResult<T>) -> StoreResult<T> {
        if self.in_rewrite {
            return f(&Statements::new(&self.conn, self.log_statements));
        }
        let tx = self.conn.transaction()?;
        let value = f(&Statements::new(&tx, self.log_statements))?;
        tx.commit()?;
        Ok(value)
    }
}

impl StorageWriter for SqliteWriter {
    fn begin_rewrite(&mut self) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        if !self.in_rewrite {
            self.conn.execute_batch("BEGIN")?;
            self.in_rewrite = true;
        }
        let statements = Statements::new(&self.conn, self.log_statements);
        for table in schema::TABLES {
            statements.execute(&format!("DELETE FROM {table}"), [])?;
        }
        Ok(())
    }

    fn end_rewrite(&mut self) -> StoreResult<()> {
        if !self.in_rewrite {
            return Ok(());
        }
        self.in_rewrite = false;
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn set_root(&mut self, id: NodeId) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.unit(|s| s.make_node(id).map(|_| ()))
    }

    fn set_type(&mut self, id: NodeId, type_tag: &str) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.unit(|s| s.set_type(id, type_tag))
    }

    fn set_property(&mut self, id: NodeId, key: &str, value: &Value) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.unit(|s| s.set_property(id, key, value))
    }

    fn set_item(&mut self, parent: NodeId, key: &str, item: &NodeRecord) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.unit(|s| s.set_item(parent, key, item))
    }

    fn clear_item(&mut self, parent: NodeId, key: &str) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.unit(|s| s.clear_item(parent, key))
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
        self.unit(|s| s.insert_item(parent, key, item, before))
    }

    fn remove_item(&mut self, parent: NodeId, key: &str, index: usize) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.unit(|s| s.remove_item(parent, key, index))
    }

    fn set_data(&mut self, id: NodeId, key: &str, data: &[u8]) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.unit(|s| s.set_data(id, key, data))
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn set_disconnected(&mut self, disconnected: bool) {
        self.disconnected = disconnected;
    }

    fn write_record(&mut self, record: &NodeRecord) -> StoreResult<()> {
        if self.disconnected {
            return Ok(());
        }
        self.unit(|s| s.write_record(record))
    }
}

/// Graph operations against one connection or open transaction.
struct Statements<'c> {
    conn: &'c Connection,
    log: bool,
}

impl<'c> Statements<'c> {
    fn new(conn: &'c Connection, log: bool) -> Self {
        Self { conn, log }
    }

    fn execute<P: Params>(&self, sql: &str, params: P) -> StoreResult<usize> {
        if self.log {
            debug!(sql, "execute");
        }
        Ok(self.conn.execute(sql, params)?)
    }

    fn require_node(&self, id: NodeId) -> StoreResult<()> {
        if query::node_exists(self.conn, id)? {
            Ok(())
        } else {
            Err(StoreError::node_not_found(id))
        }
    }

    /// Inserts an empty node unless it exists. Returns `true` if inserted.
    fn make_node(&self, id: NodeId) -> StoreResult<bool> {
        let inserted = self.execute(
            "INSERT OR IGNORE INTO nodes (id, type, refcount) VALUES (?1, NULL, 0)",
            [id.to_string()],
        )?;
        Ok(inserted == 1)
    }

    fn ensure_node(&self, record: &NodeRecord) -> StoreResult<()> {
        if self.make_node(record.id)? {
            self.write_record(record)?;
        }
        Ok(())
    }

    fn write_record(&self, record: &NodeRecord) -> StoreResult<()> {
        for (key, value) in &record.properties {
            self.set_property(record.id, key, value)?;
        }
        for (key, item) in &record.items {
            self.set_item(record.id, key, item)?;
        }
        for (key, data) in &record.data {
            self.set_data(record.id, key, data)?;
        }
        for (key, members) in &record.relationships {
            for (index, member) in members.iter().enumerate() {
                self.insert_item(record.id, key, member, index)?;
            }
        }
        if let Some(type_tag) = &record.type_tag {
            self.set_type(record.id, type_tag)?;
        }
        Ok(())
    }

    fn set_type(&self, id: NodeId, type_tag: &str) -> StoreResult<()> {
        let updated = self.execute(
            "UPDATE nodes SET type=?1 WHERE id=?2",
            params![type_tag, id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::node_not_found(id));
        }
        Ok(())
    }

    fn set_property(&self, id: NodeId, key: &str, value: &Value) -> StoreResult<()> {
        self.require_node(id)?;
        self.execute(
            "INSERT OR REPLACE INTO properties (id, key, value) VALUES (?1, ?2, ?3)",
            params![id.to_string(), key, encode_value(value)?],
        )?;
        Ok(())
    }

    fn set_data(&self, id: NodeId, key: &str, data: &[u8]) -> StoreResult<()> {
        self.require_node(id)?;
        self.execute(
            "INSERT OR REPLACE INTO data (id, key, value) VALUES (?1, ?2, ?3)",
            params![id.to_string(), key, data],
        )?;
        Ok(())
    }

    fn set_item(&self, parent: NodeId, key: &str, item: &NodeRecord) -> StoreResult<()> {
        self.require_node(parent)?;
        let previous = query::item(self.conn, parent, key)?;
        if previous == Some(item.id) {
            return Ok(());
        }

        self.ensure_node(item)?;
        self.execute(
            "INSERT OR REPLACE INTO items (parent_id, key, item_id) VALUES (?1, ?2, ?3)",
            params![parent.to_string(), key, item.id.to_string()],
        )?;
        self.add_ref(item.id)?;

        if let Some(previous) = previous {
            self.release(previous)?;
        }
        Ok(())
    }

    fn clear_item(&self, parent: NodeId, key: &str) -> StoreResult<()> {
        let item = query::item(self.conn, parent, key)?
            .ok_or_else(|| StoreError::item_not_found(parent, key))?;
        self.execute(
            "DELETE FROM items WHERE parent_id=?1 AND key=?2",
            params![parent.to_string(), key],
        )?;
        self.release(item)
    }

    fn insert_item(
        &self,
        parent: NodeId,
        key: &str,
        item: &NodeRecord,
        before: usize,
    ) -> StoreResult<()> {
        self.require_node(parent)?;
        if before > query::relationship_len(self.conn, parent, key)? {
            return Err(StoreError::relationship_index(parent, key, before));
        }
        let index = to_index(before)?;

        self.ensure_node(item)?;
        let parent_text = parent.to_string();
        // 0 1 2 ^ 3 4 => 0 1 2 -4 -5 => 0 1 2 4 5
        self.execute(
            "UPDATE relationships SET item_index = -(item_index + 1) WHERE parent_id=?1 AND key=?2 AND item_index >= ?3",
            params![parent_text, key, index],
        )?;
        self.execute(
            "UPDATE relationships SET item_index = -item_index WHERE parent_id=?1 AND key=?2 AND item_index < 0",
            params![parent_text, key],
        )?;
        self.execute(
            "INSERT INTO relationships (parent_id, key, item_index, item_id) VALUES (?1, ?2, ?3, ?4)",
            params![parent_text, key, index, item.id.to_string()],
        )?;
        self.add_ref(item.id)
    }

    fn remove_item(&self, parent: NodeId, key: &str, index: usize) -> StoreResult<()> {
        let position = to_index(index)?;
        let parent_text = parent.to_string();
        let item = query::ids(
            self.conn,
            "SELECT item_id FROM relationships WHERE parent_id=?1 AND key=?2 AND item_index=?3",
            params![parent_text, key, position],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::relationship_index(parent, key, index))?;

        self.execute(
            "DELETE FROM relationships WHERE parent_id=?1 AND key=?2 AND item_index=?3",
            params![parent_text, key, position],
        )?;
        // 0 1 (2) 3 4 => 0 1 -3 -4 => 0 1 2 3
        self.execute(
            "UPDATE relationships SET item_index = -item_index WHERE parent_id=?1 AND key=?2 AND item_index > ?3",
            params![parent_text, key, position],
        )?;
        self.execute(
            "UPDATE relationships SET item_index = -item_index - 1 WHERE parent_id=?1 AND key=?2 AND item_index < 0",
            params![parent_text, key],
        )?;
        self.release(item)
    }

    fn add_ref(&self, id: NodeId) -> StoreResult<()> {
        self.execute(
            "UPDATE nodes SET refcount=refcount+1 WHERE id=?1",
            [id.to_string()],
        )?;
        Ok(())
    }

    /// Drops one reference to `id`, deleting every node that becomes
    /// unreferenced.
    fn release(&self, id: NodeId) -> StoreResult<()> {
        self.require_node(id)?;

        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(count) = query::ref_count(self.conn, id)? else {
                warn!(%id, "dangling reference during cascade");
                continue;
            };
            if count <= 0 {
                return Err(StoreError::RefCountUnderflow { id });
            }
            let key = id.to_string();
            self.execute(
                "UPDATE nodes SET refcount=?1 WHERE id=?2",
                params![count - 1, key],
            )?;
            if count > 1 {
                continue;
            }

            pending.extend(query::ids(
                self.conn,
                "SELECT item_id FROM items WHERE parent_id=?1",
                [&key],
            )?);
            pending.extend(query::ids(
                self.conn,
                "SELECT item_id FROM relationships WHERE parent_id=?1 ORDER BY key, item_index",
                [&key],
            )?);
            self.execute("DELETE FROM items WHERE parent_id=?1", [&key])?;
            self.execute("DELETE FROM relationships WHERE parent_id=?1", [&key])?;
            self.execute("DELETE FROM properties WHERE id=?1", [&key])?;
            self.execute("DELETE FROM data WHERE id=?1", [&key])?;
            self.execute("DELETE FROM nodes WHERE id=?1", [&key])?;
            debug!(%id, "node deleted");
        }
        Ok(())
    }
}

fn to_index(index: usize) -> StoreResult<i64> {
    i64::try_from(index).map_err(|_| StoreError::corrupted(format!("index {index} out of range")))
}
