use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::query::{CompositeIndex, json_path};

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Document store: running migration v1 (documents table)");
        conn.execute_batch(
            "
            CREATE TABLE documents (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                collection  TEXT NOT NULL,
                id          TEXT NOT NULL,
                data        TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(collection, id)
            );

            CREATE INDEX idx_documents_collection
                ON documents(collection, seq);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

/// Expression index over `(collection, json_extract(data, field)...)` for each
/// declared composite index, so filtered queries avoid a collection scan.
pub fn ensure_indexes(conn: &Connection, indexes: &[CompositeIndex]) -> Result<()> {
    for index in indexes {
        let columns: Option<Vec<String>> = index
            .fields
            .iter()
            .map(|f| json_path(f).map(|path| format!("json_extract(data, '{path}')")))
            .collect();
        let (Some(columns), Some(_)) = (columns, json_path(&index.collection)) else {
            warn!("Skipping index on {} with unsupported field names", index.collection);
            continue;
        };

        let name = format!("idx_{}_{}", index.collection, index.fields.join("_"));
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {name} ON documents(collection, {})",
            columns.join(", ")
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_indexes;

    #[test]
    fn test_declared_indexes_are_created_once() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        ensure_indexes(&conn, &default_indexes()).unwrap();
        ensure_indexes(&conn, &default_indexes()).unwrap();

        let names: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert!(names.contains(&"idx_messages_chatId_createdAt".to_string()));
        assert!(names.contains(&"idx_chats_members_type_lastMessageAt".to_string()));
        assert!(names.contains(&"idx_documents_collection".to_string()));
    }
}
