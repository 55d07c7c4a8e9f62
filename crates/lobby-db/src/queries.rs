use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params_from_iter};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::models::{Document, DocumentRow, FieldUpdate};
use crate::query::{FilterOp, Query, json_path};
use crate::Database;

impl Database {
    // -- Reads --

    pub(crate) fn fetch(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.with_conn(|conn| {
            query_document(conn, collection, id)?
                .map(Document::from_row)
                .transpose()
        })
    }

    /// Runs `query` after checking it is covered by a declared index.
    pub(crate) fn run_query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        if let Some(required) = query.required_index() {
            if !self.indexes.contains(&required) {
                return Err(StoreError::FailedPrecondition {
                    collection: required.collection,
                    fields: required.fields.join(", "),
                });
            }
        }

        let docs = self.with_conn(|conn| query_matching(conn, query))?;
        Ok(query.apply(docs))
    }

    // -- Writes --

    pub(crate) fn insert(
        &self,
        collection: &str,
        id: &str,
        data: &Map<String, Value>,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(data)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
                (collection, id, &json),
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
                    StoreError::AlreadyExists {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    }
                }
                other => other.into(),
            })?;
            Ok(())
        })
    }

    /// Read-modify-write of a single document inside one transaction.
    pub(crate) fn apply_updates(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
    ) -> StoreResult<Document> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let row = query_document(&tx, collection, id)?.ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
            let mut doc = Document::from_row(row)?;
            for update in updates {
                update.apply(&mut doc.data)?;
            }

            tx.execute(
                "UPDATE documents SET data = ?1, updated_at = datetime('now')
                 WHERE collection = ?2 AND id = ?3",
                (serde_json::to_string(&doc.data)?, collection, id),
            )?;
            tx.commit()?;
            Ok(doc)
        })
    }

    pub(crate) fn remove(&self, collection: &str, id: &str) -> StoreResult<()> {
        let affected = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                (collection, id),
            )?)
        })?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

fn query_document(conn: &Connection, collection: &str, id: &str) -> StoreResult<Option<DocumentRow>> {
    let mut stmt =
        conn.prepare("SELECT seq, id, data FROM documents WHERE collection = ?1 AND id = ?2")?;

    let row = stmt
        .query_row((collection, id), |row| {
            Ok(DocumentRow {
                seq: row.get(0)?,
                id: row.get(1)?,
                data: row.get(2)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// `SELECT` narrowing `query` in SQL. Only string and integer operands are
/// pushed down; `Query::apply` re-checks every row, so the statement may
/// over-select but never drops a match.
fn select_for(query: &Query) -> (String, Vec<SqlValue>) {
    let mut sql = String::from("SELECT seq, id, data FROM documents WHERE collection = ?1");
    let mut params = vec![SqlValue::Text(query.collection.clone())];

    for filter in &query.filters {
        let (Some(path), Some(operand)) = (json_path(&filter.field), sql_operand(&filter.value))
        else {
            continue;
        };
        params.push(operand);
        let n = params.len();
        let clause = match filter.op {
            FilterOp::ArrayContains => format!(
                " AND EXISTS (SELECT 1 FROM json_each(data, '{path}') WHERE json_each.value = ?{n})"
            ),
            FilterOp::Eq => format!(" AND json_extract(data, '{path}') = ?{n}"),
            FilterOp::Gt => format!(" AND json_extract(data, '{path}') > ?{n}"),
            FilterOp::Gte => format!(" AND json_extract(data, '{path}') >= ?{n}"),
            FilterOp::Lt => format!(" AND json_extract(data, '{path}') < ?{n}"),
            FilterOp::Lte => format!(" AND json_extract(data, '{path}') <= ?{n}"),
        };
        sql.push_str(&clause);
    }

    (sql, params)
}

fn sql_operand(value: &Value) -> Option<SqlValue> {
    match value {
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(SqlValue::Integer),
        _ => None,
    }
}

/// Documents of `query.collection` that may match its filters, in
/// store-assigned (insertion) order.
fn query_matching(conn: &Connection, query: &Query) -> StoreResult<Vec<Document>> {
    let (sql, params) = select_for(query);
    let mut stmt = conn.prepare(&sql)?;

    let mut rows = stmt
        .query_map(params_from_iter(params), |row| {
            Ok(DocumentRow {
                seq: row.get(0)?,
                id: row.get(1)?,
                data: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Index scans return rows in index order
    rows.sort_by_key(|r| r.seq);
    rows.into_iter().map(Document::from_row).collect()
}
