//! SQL text dumps.

use crate::error::StoreResult;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::fmt::Write as _;

/// Renders every user table as a SQL script that recreates it.
///
/// The script has the shape of SQLite's `.dump`: one `CREATE TABLE` per table
/// followed by one `INSERT` per row, wrapped in a transaction. Tables and rows
/// are emitted in a stable order so equal stores produce equal scripts.
///
/// # Errors
///
/// Returns an error if the catalog or a table cannot be read.
pub fn dump(conn: &Connection) -> StoreResult<String> {
    let mut out = String::from("BEGIN TRANSACTION;\n");

    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (name, sql) in tables {
        let _ = writeln!(out, "{};", strip_if_not_exists(&sql));

        let mut rows_stmt = conn.prepare(&format!("SELECT * FROM \"{name}\" ORDER BY 1, 2, 3"))?;
        let columns = rows_stmt.column_count();
        let mut rows = rows_stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for column in 0..columns {
                values.push(literal(row.get_ref(column)?));
            }
            let _ = writeln!(out, "INSERT INTO \"{name}\" VALUES({});", values.join(","));
        }
    }

    out.push_str("COMMIT;\n");
    Ok(out)
}

fn strip_if_not_exists(sql: &str) -> String {
    sql.replacen("CREATE TABLE IF NOT EXISTS ", "CREATE TABLE ", 1)
}

fn literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(n) => n.to_string(),
        ValueRef::Real(f) => format!("{f:?}"),
        ValueRef::Text(text) => format!("'{}'", String::from_utf8_lossy(text).replace('\'', "''")),
        ValueRef::Blob(bytes) => format!("X'{}'", hex::encode_upper(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::schema;

    #[test]
    fn dump_renders_schema_and_rows() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create(&conn).unwrap();
        conn.execute(
            "INSERT INTO nodes (id, type, refcount) VALUES ('a', 'it''s', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO data (id, key, value) VALUES ('a', 'raw', X'00FF')",
            [],
        )
        .unwrap();

        let script = dump(&conn).unwrap();
        assert!(script.starts_with("BEGIN TRANSACTION;\n"));
        assert!(script.ends_with("COMMIT;\n"));
        assert!(script.contains("CREATE TABLE nodes(id TEXT, type TEXT, refcount INTEGER, PRIMARY KEY(id));"));
        assert!(script.contains("INSERT INTO \"nodes\" VALUES('a','it''s',0);"));
        assert!(script.contains("INSERT INTO \"data\" VALUES('a','raw',X'00FF');"));
    }

    #[test]
    fn dump_reloads() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create(&conn).unwrap();
        conn.execute(
            "INSERT INTO properties (id, key, value) VALUES ('a', 'k', X'01')",
            [],
        )
        .unwrap();
        let script = dump(&conn).unwrap();

        let copy = Connection::open_in_memory().unwrap();
        copy.execute_batch(&script).unwrap();
        assert_eq!(dump(&copy).unwrap(), script);
    }
}
