use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;
use tracing::debug;

use super::{add_to_set_in, check_name, set_field_in, DocId, DocumentStore, InsertOutcome};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<DocId, Value>,
    keys: HashMap<String, DocId>,
    next_id: DocId,
}

/// Number of calls per store operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub insert: usize,
    pub add_to_set: usize,
    pub set_field: usize,
    pub drop: usize,
}

impl fmt::Display for CallCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserts, {} add_to_set, {} set_field, {} drops",
            self.insert, self.add_to_set, self.set_field, self.drop
        )
    }
}

/// Store kept in process memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Collection>,
    calls: CallCounts,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn calls(&self) -> CallCounts {
        self.calls
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Accept calls again after `close`, keeping the stored documents.
    #[cfg(test)]
    pub fn reopen(&mut self) {
        self.closed = false;
    }

    fn open_collection(&mut self, collection: &str) -> Result<&mut Collection, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        let name = check_name(collection)?;
        Ok(self.collections.entry(name.to_string()).or_default())
    }

    fn doc_mut(&mut self, collection: &str, id: DocId) -> Result<&mut Value, StoreError> {
        self.open_collection(collection)?
            .docs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id,
            })
    }
}

impl DocumentStore for MemoryStore {
    fn insert_one(
        &mut self,
        collection: &str,
        key: Option<&str>,
        doc: &Value,
    ) -> Result<InsertOutcome, StoreError> {
        self.calls.insert += 1;
        let col = self.open_collection(collection)?;
        if let Some(existing) = key.and_then(|k| col.keys.get(k)) {
            return Ok(InsertOutcome::Conflict(*existing));
        }
        col.next_id += 1;
        let id = col.next_id;
        col.docs.insert(id, doc.clone());
        if let Some(k) = key {
            col.keys.insert(k.to_string(), id);
        }
        Ok(InsertOutcome::Inserted(id))
    }

    fn add_to_set(
        &mut self,
        collection: &str,
        id: DocId,
        field: &str,
        values: &[String],
    ) -> Result<Vec<String>, StoreError> {
        self.calls.add_to_set += 1;
        let doc = self.doc_mut(collection, id)?;
        Ok(add_to_set_in(doc, field, values))
    }

    fn set_field(
        &mut self,
        collection: &str,
        id: DocId,
        field: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.calls.set_field += 1;
        let doc = self.doc_mut(collection, id)?;
        set_field_in(doc, field, value);
        Ok(())
    }

    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        self.calls.drop += 1;
        if self.closed {
            return Err(StoreError::Closed);
        }
        self.collections.remove(check_name(collection)?);
        Ok(())
    }

    #[cfg(test)]
    fn find_one(&self, collection: &str, id: DocId) -> Result<Option<Value>, StoreError> {
        Ok(self
            .collections
            .get(check_name(collection)?)
            .and_then(|c| c.docs.get(&id))
            .cloned())
    }

    fn find_all(&self, collection: &str) -> Result<Vec<(DocId, Value)>, StoreError> {
        Ok(self
            .collections
            .get(check_name(collection)?)
            .map(|c| c.docs.iter().map(|(id, d)| (*id, d.clone())).collect())
            .unwrap_or_default())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if !self.closed {
            debug!("Memory store closed after {}", self.calls);
        }
        self.closed = true;
        Ok(())
    }
}
