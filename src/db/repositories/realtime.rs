use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};

use crate::db::helpers::parse_json;

/// The children stored under `path` as one object, or `None` when the path is empty.
pub(crate) fn read_children(conn: &Connection, path: &str) -> Result<Option<Value>> {
    let mut stmt = conn.prepare(
        "SELECT key, value
         FROM realtime_nodes
         WHERE path = ?1
         ORDER BY key ASC",
    )?;

    let mut rows = stmt.query(params![path])?;
    let mut children = Map::new();
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        let raw: String = row.get(1)?;
        children.insert(key, parse_json(&raw, "value")?);
    }

    if children.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Value::Object(children)))
    }
}

pub(crate) fn write_child(conn: &Connection, path: &str, key: &str, value: &Value) -> Result<()> {
    conn.execute(
        "INSERT INTO realtime_nodes (path, key, value, written_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(path, key) DO UPDATE
         SET value = excluded.value,
             written_at = excluded.written_at",
        params![path, key, serde_json::to_string(value)?, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to write {path}/{key}"))?;
    Ok(())
}

pub(crate) fn delete_children(conn: &Connection, path: &str) -> Result<usize> {
    conn.execute("DELETE FROM realtime_nodes WHERE path = ?1", params![path])
        .with_context(|| format!("failed to clear {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use serde_json::json;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn children_are_grouped_by_path() {
        let conn = conn();
        assert_eq!(read_children(&conn, "logs/gym").unwrap(), None);

        write_child(&conn, "logs/gym", "b", &json!({ "count": 2 })).unwrap();
        write_child(&conn, "logs/gym", "a", &json!({ "count": 1 })).unwrap();
        write_child(&conn, "logs/pool", "a", &json!({ "count": 9 })).unwrap();

        assert_eq!(
            read_children(&conn, "logs/gym").unwrap(),
            Some(json!({ "a": { "count": 1 }, "b": { "count": 2 } }))
        );

        assert_eq!(delete_children(&conn, "logs/gym").unwrap(), 2);
        assert_eq!(read_children(&conn, "logs/gym").unwrap(), None);
        assert!(read_children(&conn, "logs/pool").unwrap().is_some());
    }
}
