use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use super::{add_to_set_in, check_name, set_field_in, DocId, DocumentStore, InsertOutcome};
use crate::error::StoreError;

/// Document store on SQLite: one table per collection, JSON documents,
/// a unique `doc_key` per document.
pub struct SqliteStore {
    conn: Option<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        debug!("Opened store at {:?}", path.as_ref());
        Ok(SqliteStore { conn: Some(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(SqliteStore {
            conn: Some(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn
            .as_ref()
            .ok_or(StoreError::Closed)
    }

    fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        let name = check_name(collection)?;
        self.conn()?.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{name}\" (
                id      INTEGER PRIMARY KEY,
                doc_key TEXT UNIQUE,
                doc     TEXT NOT NULL
            );"
        ))?;
        Ok(())
    }

    fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        let n: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![collection],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Read-modify-write of one document inside a transaction.
    fn update_doc<T>(
        &mut self,
        collection: &str,
        id: DocId,
        f: impl FnOnce(&mut Value) -> T,
    ) -> Result<T, StoreError> {
        let name = check_name(collection)?;
        self.ensure_collection(name)?;
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let raw: Option<String> = tx
            .query_row(
                &format!("SELECT doc FROM \"{name}\" WHERE id = ?1"),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id,
            });
        };
        let mut doc: Value = serde_json::from_str(&raw)?;
        let out = f(&mut doc);
        tx.execute(
            &format!("UPDATE \"{name}\" SET doc = ?1 WHERE id = ?2"),
            params![serde_json::to_string(&doc)?, id],
        )?;
        tx.commit()?;
        Ok(out)
    }
}

impl DocumentStore for SqliteStore {
    fn insert_one(
        &mut self,
        collection: &str,
        key: Option<&str>,
        doc: &Value,
    ) -> Result<InsertOutcome, StoreError> {
        let name = check_name(collection)?;
        self.ensure_collection(name)?;
        let conn = self.conn()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO \"{name}\" (doc_key, doc) VALUES (?1, ?2)
                 ON CONFLICT(doc_key) DO NOTHING"
            ),
            params![key, serde_json::to_string(doc)?],
        )?;
        if inserted > 0 {
            return Ok(InsertOutcome::Inserted(conn.last_insert_rowid()));
        }
        let existing: DocId = conn.query_row(
            &format!("SELECT id FROM \"{name}\" WHERE doc_key = ?1"),
            params![key],
            |r| r.get(0),
        )?;
        Ok(InsertOutcome::Conflict(existing))
    }

    fn add_to_set(
        &mut self,
        collection: &str,
        id: DocId,
        field: &str,
        values: &[String],
    ) -> Result<Vec<String>, StoreError> {
        self.update_doc(collection, id, |doc| add_to_set_in(doc, field, values))
    }

    fn set_field(
        &mut self,
        collection: &str,
        id: DocId,
        field: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.update_doc(collection, id, |doc| set_field_in(doc, field, value))
    }

    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        let name = check_name(collection)?;
        self.conn()?
            .execute_batch(&format!("DROP TABLE IF EXISTS \"{name}\";"))?;
        Ok(())
    }

    #[cfg(test)]
    fn find_one(&self, collection: &str, id: DocId) -> Result<Option<Value>, StoreError> {
        let name = check_name(collection)?;
        if !self.collection_exists(name)? {
            return Ok(None);
        }
        let raw: Option<String> = self
            .conn()?
            .query_row(
                &format!("SELECT doc FROM \"{name}\" WHERE id = ?1"),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn find_all(&self, collection: &str) -> Result<Vec<(DocId, Value)>, StoreError> {
        let name = check_name(collection)?;
        if !self.collection_exists(name)? {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT id, doc FROM \"{name}\" ORDER BY id"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, DocId>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, raw)| -> Result<(DocId, Value), StoreError> {
                Ok((id, serde_json::from_str(&raw)?))
            })
            .collect()
    }

    fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let name = check_name(collection)?;
        if !self.collection_exists(name)? {
            return Ok(0);
        }
        let n: i64 = self
            .conn()?
            .query_row(&format!("SELECT COUNT(*) FROM \"{name}\""), [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }
}
