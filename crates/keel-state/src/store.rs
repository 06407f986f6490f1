//! MetadataStore: redb-backed hierarchical key/value persistence.
//!
//! Keys look like POSIX paths. A record is JSON-serialized on the way in and
//! deserialized on the way out; a blob is stored as raw bytes. Both live in
//! the same key namespace, and the caller picks the mode by choosing
//! [`MetadataStore::store_record`] or [`MetadataStore::store_blob`].
//!
//! Every write is its own redb write transaction: a whole-value replace that
//! is atomic per key. Nothing serializes concurrent writers to the same key,
//! so the last writer wins.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::key::{child_prefix, normalize_key};
use crate::tables::KEYS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe metadata store backed by redb.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<Database>,
}

impl MetadataStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "metadata store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory metadata store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(KEYS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Serialize `value` as JSON and store it under `key`.
    pub fn store_record<T: Serialize>(&self, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        self.put(key, &bytes)
    }

    /// Store `data` verbatim under `key`.
    pub fn store_blob(&self, key: &str, data: &[u8]) -> StateResult<()> {
        self.put(key, data)
    }

    fn put(&self, key: &str, value: &[u8]) -> StateResult<()> {
        let key = normalize_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, bytes = value.len(), "key stored");
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Load and deserialize the record at `key`.
    ///
    /// A missing key and a value that does not parse as `T` both surface as
    /// `NotFound`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> StateResult<T> {
        let bytes = self.load_blob(key)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            debug!(%key, error = %e, "malformed record");
            StateError::NotFound(key.to_string())
        })
    }

    /// Load the raw bytes at `key`.
    pub fn load_blob(&self, key: &str) -> StateResult<Vec<u8>> {
        let normalized = normalize_key(key)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KEYS).map_err(map_err!(Table))?;
        match table.get(normalized.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(StateError::NotFound(key.to_string())),
        }
    }

    /// Whether a value is stored at exactly `key`.
    pub fn exists(&self, key: &str) -> StateResult<bool> {
        let key = normalize_key(key)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KEYS).map_err(map_err!(Table))?;
        Ok(table.get(key.as_str()).map_err(map_err!(Read))?.is_some())
    }

    /// Names of the immediate children of `key`, sorted.
    ///
    /// A key with nothing beneath it yields an empty list, not an error.
    pub fn list(&self, key: &str) -> StateResult<Vec<String>> {
        let prefix = child_prefix(key)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KEYS).map_err(map_err!(Table))?;
        let mut children = BTreeSet::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (k, _) = entry.map_err(map_err!(Read))?;
            let Some(rest) = k.value().strip_prefix(prefix.as_str()) else {
                break;
            };
            let child = rest.split('/').next().unwrap_or(rest);
            children.insert(child.to_string());
        }
        Ok(children.into_iter().collect())
    }

    // ── Deletes ────────────────────────────────────────────────────

    /// Delete the value at `key`; `NotFound` if there is none.
    pub fn delete(&self, key: &str) -> StateResult<()> {
        let normalized = normalize_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            existed = table
                .remove(normalized.as_str())
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if !existed {
            return Err(StateError::NotFound(key.to_string()));
        }
        debug!(key = %normalized, "key deleted");
        Ok(())
    }

    /// Delete `key` and everything beneath it. Returns the number of keys
    /// removed; absence is not an error.
    pub fn delete_all(&self, key: &str) -> StateResult<u32> {
        let key = normalize_key(key)?;
        let prefix = format!("{key}/");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            let mut doomed = Vec::new();
            for entry in table.range(key.as_str()..).map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                let k = k.value();
                if k == key || k.starts_with(&prefix) {
                    doomed.push(k.to_string());
                } else if !k.starts_with(key.as_str()) {
                    break;
                }
            }
            count = doomed.len() as u32;
            for k in &doomed {
                table.remove(k.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, count, "key tree deleted");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        size: u32,
        tags: Vec<String>,
    }

    fn widget(name: &str) -> Widget {
        Widget {
            name: name.to_string(),
            size: 3,
            tags: vec!["a".to_string(), "b".to_string()],
        }
    }

    #[test]
    fn record_round_trip() {
        let store = MetadataStore::open_in_memory().unwrap();
        let w = widget("gear");

        store.store_record("apps/web/widgets/gear", &w).unwrap();
        let loaded: Widget = store.load("apps/web/widgets/gear").unwrap();

        assert_eq!(loaded, w);
    }

    #[test]
    fn blob_round_trip_is_verbatim() {
        let store = MetadataStore::open_in_memory().unwrap();
        let data: Vec<u8> = (0..=255u8).chain([0, 0, 255]).collect();

        store.store_blob("apps/web/raw", &data).unwrap();

        assert_eq!(store.load_blob("apps/web/raw").unwrap(), data);
    }

    #[test]
    fn load_missing_is_not_found() {
        let store = MetadataStore::open_in_memory().unwrap();
        let err = store.load::<Widget>("apps/none").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn load_malformed_is_not_found() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.store_blob("apps/web/bad", b"not json").unwrap();
        let err = store.load::<Widget>("apps/web/bad").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn store_replaces_whole_value() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.store_record("k", &widget("one")).unwrap();
        let mut second = widget("two");
        second.tags.clear();
        store.store_record("k", &second).unwrap();

        let loaded: Widget = store.load("k").unwrap();
        assert_eq!(loaded, second);
    }

    #[test]
    fn list_absent_key_is_empty() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(store.list("apps/web/builds").unwrap().is_empty());
    }

    #[test]
    fn list_returns_exactly_the_children() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.store_record("apps/web/builds/B1", &widget("1")).unwrap();
        store.store_record("apps/web/builds/B2", &widget("2")).unwrap();
        store.store_record("apps/web/builds/B3", &widget("3")).unwrap();
        store.store_record("apps/web/builds-archive/B0", &widget("0")).unwrap();
        store.store_record("apps/web", &widget("web")).unwrap();

        assert_eq!(store.list("apps/web/builds").unwrap(), vec!["B1", "B2", "B3"]);
    }

    #[test]
    fn list_collapses_nested_children() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.store_record("apps/web", &widget("web")).unwrap();
        store.store_record("apps/web/builds/B1", &widget("1")).unwrap();
        store.store_record("apps/api/tables/t/T1", &widget("1")).unwrap();
        store.store_record("apps/a-b", &widget("ab")).unwrap();

        assert_eq!(store.list("apps").unwrap(), vec!["a-b", "api", "web"]);
        assert_eq!(store.list("").unwrap(), vec!["apps"]);
    }

    #[test]
    fn exists_checks_exact_key() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.store_record("apps/web/builds/B1", &widget("1")).unwrap();

        assert!(store.exists("apps/web/builds/B1").unwrap());
        assert!(!store.exists("apps/web/builds").unwrap());
    }

    #[test]
    fn delete_missing_fails() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.store_record("a/b", &widget("b")).unwrap();

        store.delete("a/b").unwrap();
        assert!(store.delete("a/b").unwrap_err().is_not_found());
    }

    #[test]
    fn delete_all_removes_subtree_only() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.store_record("apps/web", &widget("web")).unwrap();
        store.store_record("apps/web/builds/B1", &widget("1")).unwrap();
        store.store_record("apps/web/releases/R1", &widget("1")).unwrap();
        store.store_record("apps/web2", &widget("web2")).unwrap();
        store.store_record("apps/web-x/builds/B9", &widget("9")).unwrap();

        assert_eq!(store.delete_all("apps/web").unwrap(), 3);
        assert!(!store.exists("apps/web").unwrap());
        assert!(store.list("apps/web").unwrap().is_empty());
        assert!(store.exists("apps/web2").unwrap());
        assert!(store.exists("apps/web-x/builds/B9").unwrap());
    }

    #[test]
    fn delete_all_absent_is_ok() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert_eq!(store.delete_all("apps/ghost").unwrap(), 0);
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(matches!(
            store.store_blob("apps/../x", b"1"),
            Err(StateError::InvalidKey(_))
        ));
        assert!(matches!(store.load_blob(""), Err(StateError::InvalidKey(_))));
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("keel.redb");

        {
            let store = MetadataStore::open(&db_path).unwrap();
            store.store_record("apps/web", &widget("web")).unwrap();
        }

        let store = MetadataStore::open(&db_path).unwrap();
        let loaded: Widget = store.load("apps/web").unwrap();
        assert_eq!(loaded.name, "web");
    }
}
