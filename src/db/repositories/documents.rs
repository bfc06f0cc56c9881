use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::{
    backend::Document,
    db::{connection::Database, helpers::parse_json_object},
};

fn row_to_document(row: &Row) -> Result<Document> {
    let fields: String = row.get("fields")?;
    Ok(Document {
        id: row.get("id")?,
        fields: parse_json_object(&fields, "fields")?,
    })
}

pub(crate) fn load_collection(conn: &Connection, collection: &str) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT id, fields
         FROM documents
         WHERE collection = ?1
         ORDER BY id ASC",
    )?;

    let mut rows = stmt.query(params![collection])?;
    let mut documents = Vec::new();
    while let Some(row) = rows.next()? {
        documents.push(row_to_document(row)?);
    }
    Ok(documents)
}

pub(crate) fn load_document(
    conn: &Connection,
    collection: &str,
    id: &str,
) -> Result<Option<Document>> {
    let raw = conn
        .query_row(
            "SELECT id, fields FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .with_context(|| format!("failed to load document {collection}/{id}"))?;

    raw.map(|(id, fields)| {
        Ok(Document {
            id,
            fields: parse_json_object(&fields, "fields")?,
        })
    })
    .transpose()
}

/// Inserts or replaces the document's fields.
pub(crate) fn write_document(
    conn: &Connection,
    collection: &str,
    id: &str,
    fields: &Map<String, Value>,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let serialized = serde_json::to_string(fields)?;
    conn.execute(
        "INSERT INTO documents (collection, id, fields, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(collection, id) DO UPDATE
         SET fields = excluded.fields,
             updated_at = excluded.updated_at",
        params![collection, id, serialized, now],
    )
    .with_context(|| format!("failed to write document {collection}/{id}"))?;
    Ok(())
}

impl Database {
    /// All documents of a collection, ordered by id.
    pub async fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let collection = collection.to_string();
        self.execute(move |conn| load_collection(conn, &collection))
            .await
    }

    pub async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.execute(move |conn| load_document(conn, &collection, &id))
            .await
    }
}
