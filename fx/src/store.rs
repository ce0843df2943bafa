//! Durable persistence for the rate table.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{FxError, FxResult};
use crate::table::RateSnapshot;

/// Synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> FxResult<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: String) -> FxResult<()>;
}

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> FxResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: String) -> FxResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Directory-backed store holding one `<key>.json` file per key.
///
/// Writes go to a temporary file that is then renamed over the target,
/// so a crash mid-write leaves the previous value readable.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if missing.
    pub fn open<P: AsRef<Path>>(dir: P) -> FxResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> FxResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(FxError::Persistence(format!("Invalid store key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> FxResult<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: String) -> FxResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Loads and saves [`RateSnapshot`]s as one JSON record.
#[derive(Clone)]
pub struct RateStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl RateStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    /// Read the persisted snapshot.
    ///
    /// Missing, unreadable or corrupt data yields `None` so the caller
    /// keeps its defaults.
    pub fn load(&self) -> Option<RateSnapshot> {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, "No persisted rate table");
                return None;
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read persisted rate table");
                return None;
            }
        };

        match serde_json::from_str::<RateSnapshot>(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Persisted rate table is corrupt");
                None
            }
        }
    }

    /// Write the full snapshot.
    pub fn save(&self, snapshot: &RateSnapshot) -> FxResult<()> {
        let raw = serde_json::to_string(snapshot)?;
        self.backend.set(&self.key, raw)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Store whose writes always fail, for exercising persistence errors.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct FailingStore;

#[cfg(any(test, feature = "test-utils"))]
impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> FxResult<Option<String>> {
        Err(FxError::Persistence("store unavailable".to_string()))
    }

    fn set(&self, _key: &str, _value: String) -> FxResult<()> {
        Err(FxError::Persistence("store unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RateTable;
    use cashbook_common::Currency;

    fn memory_rate_store() -> (Arc<MemoryStore>, RateStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = RateStore::new(backend.clone(), "exchange_rates");
        (backend, store)
    }

    #[test]
    fn test_load_missing_is_none() {
        let (_, store) = memory_rate_store();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let (_, store) = memory_rate_store();
        let mut table = RateTable::default();
        table.set(&Currency::syp(), 14500.0).unwrap();

        store.save(&table.snapshot()).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, table.snapshot());
    }

    #[test]
    fn test_load_corrupt_is_none() {
        let (backend, store) = memory_rate_store();
        backend
            .set("exchange_rates", "{not json".to_string())
            .unwrap();

        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_wrong_shape_is_none() {
        let (backend, store) = memory_rate_store();
        backend
            .set("exchange_rates", r#"{"rates":"SYP"}"#.to_string())
            .unwrap();

        assert!(store.load().is_none());
    }

    #[test]
    fn test_failing_backend() {
        let store = RateStore::new(Arc::new(FailingStore), "exchange_rates");

        assert!(store.load().is_none());
        let err = store.save(&RateTable::default().snapshot()).unwrap_err();
        assert!(matches!(err, FxError::Persistence(_)));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested")).unwrap();

        assert_eq!(store.get("exchange_rates").unwrap(), None);

        store.set("exchange_rates", "{}".to_string()).unwrap();
        store.set("exchange_rates", "{\"rates\":{}}".to_string()).unwrap();

        assert_eq!(
            store.get("exchange_rates").unwrap().as_deref(),
            Some("{\"rates\":{}}")
        );
        assert!(!dir.path().join("nested/exchange_rates.json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.set("../escape", "x".to_string()).is_err());
        assert!(store.get("a/b").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let table = RateTable::default();

        {
            let backend = Arc::new(FileStore::open(dir.path()).unwrap());
            RateStore::new(backend, "rates").save(&table.snapshot()).unwrap();
        }

        let backend = Arc::new(FileStore::open(dir.path()).unwrap());
        let loaded = RateStore::new(backend, "rates").load().unwrap();
        assert_eq!(loaded, table.snapshot());
    }
}
