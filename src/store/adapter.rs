use chrono::Local;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{connect, DocumentStore, InsertOutcome};
use crate::error::{PipelineError, StoreError};
use crate::record::{CourseRecord, LANG_OTHERS};
use crate::settings::{RunOverrides, Settings};

/// Where this run writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    pub database: String,
    pub collection: String,
    pub stats_collection: String,
}

impl StoreTarget {
    pub fn resolve(settings: &Settings, overrides: &RunOverrides) -> Self {
        let pick = |over: &str, default: &str| {
            let chosen = if over.is_empty() { default } else { over };
            chosen.to_string()
        };
        StoreTarget {
            database: pick(&overrides.database, &settings.store_database),
            collection: pick(&overrides.collection, &settings.store_collection),
            stats_collection: settings.store_stats_collection.clone(),
        }
    }
}

/// What happened to a record that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    Inserted,
    /// Key already stored; new keywords and a specific language were merged in.
    Merged {
        keywords_added: Vec<String>,
        lang_set: bool,
    },
}

/// Final pipeline stage: inserts courses and merges conflicting ones.
pub struct StoreAdapter<S: DocumentStore> {
    store: S,
    target: StoreTarget,
    closed: bool,
}

impl StoreAdapter<Box<dyn DocumentStore>> {
    pub fn open(settings: &Settings, overrides: &RunOverrides) -> Result<Self, StoreError> {
        let target = StoreTarget::resolve(settings, overrides);
        let store = connect(&settings.store_uri, &target.database)?;
        info!(
            "Writing to {} / {} (stats: {})",
            target.database, target.collection, target.stats_collection
        );
        Ok(Self::with_store(store, target))
    }
}

impl<S: DocumentStore> StoreAdapter<S> {
    pub fn with_store(store: S, target: StoreTarget) -> Self {
        StoreAdapter {
            store,
            target,
            closed: false,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn target(&self) -> &StoreTarget {
        &self.target
    }

    pub fn process(
        &mut self,
        mut record: CourseRecord,
    ) -> Result<(CourseRecord, Persisted), PipelineError> {
        let doc = record.to_document().map_err(StoreError::from)?;
        let key = record.store_key();
        let col = self.target.collection.as_str();

        match self.store.insert_one(col, Some(&key), &doc)? {
            InsertOutcome::Inserted(id) => {
                record.id = Some(id);
                info!("Course '{}' is added to collection {}", record.title, col);
                Ok((record, Persisted::Inserted))
            }
            InsertOutcome::Conflict(id) => {
                warn!("Duplicate key course '{}' (id {}), merging", record.title, id);
                record.id = Some(id);

                let mut keywords_added = Vec::new();
                if let Some(keywords) = record.keywords.as_deref().filter(|k| !k.is_empty()) {
                    keywords_added = self.store.add_to_set(col, id, "keywords", keywords)?;
                    info!(
                        "Added program {:?} to {} in collection {}",
                        keywords_added, record.title, col
                    );
                }

                let lang_set = record.lang != LANG_OTHERS;
                if lang_set {
                    self.store
                        .set_field(col, id, "lang", Value::String(record.lang.clone()))?;
                    info!(
                        "Set lang '{}' for {} in collection {}",
                        record.lang, record.title, col
                    );
                }

                Ok((record, Persisted::Merged { keywords_added, lang_set }))
            }
        }
    }

    /// Replace the stats document with this run's finish time and release the store.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let stats = json!({ "finish_time": finish_time() });
        let written = self
            .store
            .drop_collection(&self.target.stats_collection)
            .and_then(|_| self.store.insert_one(&self.target.stats_collection, None, &stats));
        let released = self.store.close();
        written?;
        released?;
        info!("Run finished at {}", stats["finish_time"]);
        Ok(())
    }
}

impl<S: DocumentStore> Drop for StoreAdapter<S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.store.close() {
                warn!("Failed to release store: {}", e);
            }
        }
    }
}

/// Local time, whole seconds.
pub fn finish_time() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample;
    use crate::store::MemoryStore;

    fn adapter() -> StoreAdapter<MemoryStore> {
        let target = StoreTarget::resolve(&Settings::default(), &RunOverrides::default());
        StoreAdapter::with_store(MemoryStore::new(), target)
    }

    fn canonical(title: &str, lang: &str, keywords: &[&str]) -> CourseRecord {
        let mut r = sample(title, "2019");
        r.school = "CSE".to_string();
        r.term = "Fall".to_string();
        r.lang = lang.to_string();
        if !keywords.is_empty() {
            r.keywords = Some(keywords.iter().map(|k| k.to_string()).collect());
        }
        r
    }

    fn stored(a: &StoreAdapter<MemoryStore>, id: i64) -> Value {
        a.store().find_one("courses", id).unwrap().unwrap()
    }

    #[test]
    fn overrides_win_when_non_empty() {
        let s = Settings::default();
        let t = StoreTarget::resolve(&s, &RunOverrides::new(Some(""), Some("ipse")));
        assert_eq!(t.database, "syllabus");
        assert_eq!(t.collection, "ipse");
        assert_eq!(t.stats_collection, "stats");
        let t = StoreTarget::resolve(&s, &RunOverrides::new(Some("test_db"), None));
        assert_eq!(t.database, "test_db");
        assert_eq!(t.collection, "courses");
    }

    #[test]
    fn insert_assigns_id() {
        let mut a = adapter();
        let (r, p) = a.process(canonical("Intro to CS", "EN", &[])).unwrap();
        assert_eq!(p, Persisted::Inserted);
        let id = r.id.unwrap();
        assert_eq!(stored(&a, id)["school"], "CSE");
    }

    #[test]
    fn conflict_unions_keywords() {
        let mut a = adapter();
        let (r, _) = a.process(canonical("Intro to CS", "EN", &["A"])).unwrap();
        let (r2, p) = a.process(canonical("Intro to CS", "EN", &["B", "A"])).unwrap();
        assert_eq!(r2.id, r.id);
        assert_eq!(
            p,
            Persisted::Merged { keywords_added: vec!["B".to_string()], lang_set: true }
        );
        assert_eq!(stored(&a, r.id.unwrap())["keywords"], json!(["A", "B"]));
        assert_eq!(a.store().count("courses").unwrap(), 1);
    }

    #[test]
    fn others_never_downgrades_lang() {
        let mut a = adapter();
        let (r, _) = a.process(canonical("Intro to CS", "EN", &[])).unwrap();
        let (_, p) = a.process(canonical("Intro to CS", "others", &[])).unwrap();
        assert_eq!(p, Persisted::Merged { keywords_added: vec![], lang_set: false });
        assert_eq!(stored(&a, r.id.unwrap())["lang"], "EN");
        assert_eq!(a.store().calls().set_field, 0);
        assert_eq!(a.store().calls().add_to_set, 0);
    }

    #[test]
    fn specific_lang_replaces_others() {
        let mut a = adapter();
        let (r, _) = a.process(canonical("Intro to CS", "others", &[])).unwrap();
        a.process(canonical("Intro to CS", "JP", &[])).unwrap();
        assert_eq!(stored(&a, r.id.unwrap())["lang"], "JP");
    }

    #[test]
    fn close_replaces_stats_document() {
        let mut a = adapter();
        a.store
            .insert_one("stats", None, &json!({"finish_time": "2019-01-01 00:00:00"}))
            .unwrap();
        a.close().unwrap();
        a.close().unwrap();

        let docs = a.store().find_all("stats").unwrap();
        assert_eq!(docs.len(), 1);
        let t = docs[0].1["finish_time"].as_str().unwrap();
        assert_ne!(t, "2019-01-01 00:00:00");
        assert!(chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S").is_ok());
        assert!(!t.contains('.'));
        assert!(a.store().is_closed());
    }
}
