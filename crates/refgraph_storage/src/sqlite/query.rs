//! Read queries shared by the relational writer and reader.

use crate::error::{StoreError, StoreResult};
use crate::id::NodeId;
use crate::node::{Node, NodeMap};
use crate::sqlite::schema;
use refgraph_codec::{decode_value, Value};
use rusqlite::{params, Connection, OptionalExtension, Params};
use tracing::warn;

/// Collects a single text column of node IDs.
pub(crate) fn ids<P: Params>(conn: &Connection, sql: &str, params: P) -> StoreResult<Vec<NodeId>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(NodeId::parse(&row?)?);
    }
    Ok(ids)
}

pub(crate) fn node_exists(conn: &Connection, id: NodeId) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM nodes WHERE id=?1",
            [id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn node_type(conn: &Connection, id: NodeId) -> StoreResult<Option<String>> {
    let found = conn
        .query_row(
            "SELECT type FROM nodes WHERE id=?1",
            [id.to_string()],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(found.flatten())
}

pub(crate) fn ref_count(conn: &Connection, id: NodeId) -> StoreResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT refcount FROM nodes WHERE id=?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn property(conn: &Connection, id: NodeId, key: &str) -> StoreResult<Option<Value>> {
    let blob = conn
        .query_row(
            "SELECT value FROM properties WHERE id=?1 AND key=?2",
            params![id.to_string(), key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    blob.map(|bytes| decode_value(&bytes).map_err(StoreError::from))
        .transpose()
}

pub(crate) fn data(conn: &Connection, id: NodeId, key: &str) -> StoreResult<Option<Vec<u8>>> {
    Ok(conn
        .query_row(
            "SELECT value FROM data WHERE id=?1 AND key=?2",
            params![id.to_string(), key],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn item(conn: &Connection, parent: NodeId, key: &str) -> StoreResult<Option<NodeId>> {
    let text = conn
        .query_row(
            "SELECT item_id FROM items WHERE parent_id=?1 AND key=?2",
            params![parent.to_string(), key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    text.as_deref().map(NodeId::parse).transpose()
}

pub(crate) fn relationship_len(conn: &Connection, parent: NodeId, key: &str) -> StoreResult<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM relationships WHERE parent_id=?1 AND key=?2",
        params![parent.to_string(), key],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(n).unwrap_or(0))
}

/// Members of one relationship in index order.
pub(crate) fn members(conn: &Connection, parent: NodeId, key: &str) -> StoreResult<Vec<NodeId>> {
    ids(
        conn,
        "SELECT item_id FROM relationships WHERE parent_id=?1 AND key=?2 ORDER BY item_index",
        params![parent.to_string(), key],
    )
}

/// Raw `(item_index, item_id)` rows of one relationship in index order.
pub(crate) fn relationship_rows(
    conn: &Connection,
    parent: NodeId,
    key: &str,
) -> StoreResult<Vec<(i64, NodeId)>> {
    let mut stmt = conn.prepare(
        "SELECT item_index, item_id FROM relationships WHERE parent_id=?1 AND key=?2 ORDER BY item_index",
    )?;
    let rows = stmt.query_map(params![parent.to_string(), key], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (index, id) = row?;
        out.push((index, NodeId::parse(&id)?));
    }
    Ok(out)
}

/// Relationships whose indices are not exactly `0..n`.
pub(crate) fn index_gaps(conn: &Connection) -> StoreResult<Vec<(NodeId, String)>> {
    let mut stmt = conn.prepare(
        "SELECT parent_id, key FROM relationships GROUP BY parent_id, key \
         HAVING MIN(item_index) != 0 OR MAX(item_index) != COUNT(*) - 1 ORDER BY parent_id, key",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut gaps = Vec::new();
    for row in rows {
        let (parent, key) = row?;
        gaps.push((NodeId::parse(&parent)?, key));
    }
    Ok(gaps)
}

/// The first unreferenced node with the given type.
pub(crate) fn find_root(conn: &Connection, type_tag: &str) -> StoreResult<Option<NodeId>> {
    let roots = ids(
        conn,
        "SELECT id FROM nodes WHERE refcount=0 AND type=?1 ORDER BY id",
        [type_tag],
    )?;
    if roots.len() > 1 {
        warn!(type_tag, count = roots.len(), "several roots of the same type");
    }
    Ok(roots.into_iter().next())
}

/// Loads one node with everything it holds.
pub(crate) fn load_node(conn: &Connection, id: NodeId) -> StoreResult<Option<Node>> {
    let key = id.to_string();
    let head = conn
        .query_row(
            "SELECT type, refcount FROM nodes WHERE id=?1",
            [&key],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    let Some((type_tag, ref_count)) = head else {
        return Ok(None);
    };

    let mut node = Node {
        type_tag,
        ref_count: u32::try_from(ref_count)
            .map_err(|_| StoreError::corrupted(format!("node {id} has refcount {ref_count}")))?,
        ..Node::default()
    };

    let mut stmt = conn.prepare("SELECT key, value FROM properties WHERE id=?1")?;
    let rows = stmt.query_map([&key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (name, bytes) = row?;
        node.properties.insert(name, decode_value(&bytes)?);
    }

    let mut stmt = conn.prepare("SELECT key, value FROM data WHERE id=?1")?;
    let rows = stmt.query_map([&key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (name, bytes) = row?;
        node.data.insert(name, bytes);
    }

    if schema::has_table(conn, "items")? {
        let mut stmt = conn.prepare("SELECT key, item_id FROM items WHERE parent_id=?1")?;
        let rows = stmt.query_map([&key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (name, item) = row?;
            node.items.insert(name, NodeId::parse(&item)?);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT key, item_id FROM relationships WHERE parent_id=?1 ORDER BY key, item_index",
    )?;
    let rows = stmt.query_map([&key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (name, member) = row?;
        node.relationships
            .entry(name)
            .or_default()
            .push(NodeId::parse(&member)?);
    }

    Ok(Some(node))
}

/// Loads the whole store as a node map.
pub(crate) fn load_node_map(conn: &Connection) -> StoreResult<NodeMap> {
    let mut map = NodeMap::new();
    for id in ids(conn, "SELECT id FROM nodes ORDER BY id", [])? {
        if let Some(node) = load_node(conn, id)? {
            map.insert(id, node);
        }
    }
    Ok(map)
}
