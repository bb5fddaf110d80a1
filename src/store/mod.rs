pub mod adapter;
pub mod memory;
pub mod sqlite;

use std::path::PathBuf;

use serde_json::Value;

use crate::error::StoreError;

pub use adapter::StoreAdapter;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type DocId = i64;

/// Result of an insert against a collection with a unique document key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(DocId),
    /// A document with the same key already exists; carries its id.
    Conflict(DocId),
}

/// The operations the pipeline needs from a document store.
pub trait DocumentStore {
    fn insert_one(
        &mut self,
        collection: &str,
        key: Option<&str>,
        doc: &Value,
    ) -> Result<InsertOutcome, StoreError>;

    /// Append values missing from the array `field`; returns the ones added.
    fn add_to_set(
        &mut self,
        collection: &str,
        id: DocId,
        field: &str,
        values: &[String],
    ) -> Result<Vec<String>, StoreError>;

    fn set_field(
        &mut self,
        collection: &str,
        id: DocId,
        field: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError>;

    #[cfg(test)]
    fn find_one(&self, collection: &str, id: DocId) -> Result<Option<Value>, StoreError>;

    fn find_all(&self, collection: &str) -> Result<Vec<(DocId, Value)>, StoreError>;

    fn count(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self.find_all(collection)?.len())
    }

    fn close(&mut self) -> Result<(), StoreError>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for Box<S> {
    fn insert_one(&mut self, c: &str, key: Option<&str>, doc: &Value) -> Result<InsertOutcome, StoreError> {
        (**self).insert_one(c, key, doc)
    }

    fn add_to_set(&mut self, c: &str, id: DocId, field: &str, values: &[String]) -> Result<Vec<String>, StoreError> {
        (**self).add_to_set(c, id, field, values)
    }

    fn set_field(&mut self, c: &str, id: DocId, field: &str, value: Value) -> Result<(), StoreError> {
        (**self).set_field(c, id, field, value)
    }

    fn drop_collection(&mut self, c: &str) -> Result<(), StoreError> {
        (**self).drop_collection(c)
    }

    #[cfg(test)]
    fn find_one(&self, c: &str, id: DocId) -> Result<Option<Value>, StoreError> {
        (**self).find_one(c, id)
    }

    fn find_all(&self, c: &str) -> Result<Vec<(DocId, Value)>, StoreError> {
        (**self).find_all(c)
    }

    fn count(&self, c: &str) -> Result<usize, StoreError> {
        (**self).count(c)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        (**self).close()
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for &mut S {
    fn insert_one(&mut self, c: &str, key: Option<&str>, doc: &Value) -> Result<InsertOutcome, StoreError> {
        (**self).insert_one(c, key, doc)
    }

    fn add_to_set(&mut self, c: &str, id: DocId, field: &str, values: &[String]) -> Result<Vec<String>, StoreError> {
        (**self).add_to_set(c, id, field, values)
    }

    fn set_field(&mut self, c: &str, id: DocId, field: &str, value: Value) -> Result<(), StoreError> {
        (**self).set_field(c, id, field, value)
    }

    fn drop_collection(&mut self, c: &str) -> Result<(), StoreError> {
        (**self).drop_collection(c)
    }

    #[cfg(test)]
    fn find_one(&self, c: &str, id: DocId) -> Result<Option<Value>, StoreError> {
        (**self).find_one(c, id)
    }

    fn find_all(&self, c: &str) -> Result<Vec<(DocId, Value)>, StoreError> {
        (**self).find_all(c)
    }

    fn count(&self, c: &str) -> Result<usize, StoreError> {
        (**self).count(c)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        (**self).close()
    }
}

/// Open the store named by `uri` for one database.
///
/// `sqlite://<dir>` keeps each database in `<dir>/<database>.sqlite`,
/// `sqlite://:memory:` and `memory://` are throwaway stores.
pub fn connect(uri: &str, database: &str) -> Result<Box<dyn DocumentStore>, StoreError> {
    let database = check_name(database)?;
    if uri.trim_end_matches('/') == "memory:" {
        return Ok(Box::new(MemoryStore::new()));
    }
    let rest = uri
        .strip_prefix("sqlite://")
        .filter(|r| !r.is_empty())
        .ok_or_else(|| StoreError::UnsupportedUri(uri.to_string()))?;
    if rest == ":memory:" {
        return Ok(Box::new(SqliteStore::open_in_memory()?));
    }
    let dir = PathBuf::from(rest);
    std::fs::create_dir_all(&dir)?;
    let store = SqliteStore::open(dir.join(format!("{}.sqlite", database)))?;
    Ok(Box::new(store))
}

/// Collection and database names end up in table names and file paths.
pub(crate) fn check_name(name: &str) -> Result<&str, StoreError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// `$addToSet` with `$each` on a JSON document. Creates the array if absent.
pub(crate) fn add_to_set_in(doc: &mut Value, field: &str, values: &[String]) -> Vec<String> {
    let Some(obj) = doc.as_object_mut() else {
        return Vec::new();
    };
    let slot = obj
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    let Value::Array(items) = slot else {
        return Vec::new();
    };

    let mut added = Vec::new();
    for v in values {
        if !items.iter().any(|i| i.as_str() == Some(v.as_str())) {
            items.push(Value::String(v.clone()));
            added.push(v.clone());
        }
    }
    added
}

pub(crate) fn set_field_in(doc: &mut Value, field: &str, value: Value) {
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(field.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_to_set_creates_and_dedups() {
        let mut doc = json!({"title": "Intro to CS"});
        let added = add_to_set_in(&mut doc, "keywords", &["A".into(), "B".into(), "A".into()]);
        assert_eq!(added, vec!["A".to_string(), "B".to_string()]);
        let added = add_to_set_in(&mut doc, "keywords", &["B".into(), "C".into()]);
        assert_eq!(added, vec!["C".to_string()]);
        assert_eq!(doc["keywords"], json!(["A", "B", "C"]));
    }

    #[test]
    fn names_are_restricted() {
        assert!(check_name("syllabus_2019").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("courses; DROP TABLE x").is_err());
        assert!(check_name("../etc").is_err());
    }

    #[test]
    fn connect_resolves_uri() {
        assert!(connect("memory://", "syllabus").is_ok());
        assert!(connect("sqlite://:memory:", "syllabus").is_ok());
        assert!(matches!(
            connect("mongodb://localhost:27017", "syllabus"),
            Err(StoreError::UnsupportedUri(_))
        ));
        assert!(matches!(
            connect("memory://", "bad name"),
            Err(StoreError::InvalidName(_))
        ));
    }
}
