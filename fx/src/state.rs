//! Shared rate table with write-through persistence.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::FxResult;
use crate::store::RateStore;
use crate::table::{RateSnapshot, RateTable};

/// The process's single rate table plus the store it is mirrored to.
///
/// Readers take a short read lock. Every successful mutation takes a
/// snapshot and a generation number under the write lock, then saves
/// after the lock is released, so reads never wait on the store. Saves
/// are serialized and a snapshot older than the last one saved is
/// dropped. A failed save is logged and the in-memory table stays
/// authoritative.
pub struct RateState {
    table: RwLock<RateTable>,
    store: RateStore,
    generation: AtomicU64,
    saved_generation: Mutex<u64>,
}

impl RateState {
    pub fn new(table: RateTable, store: RateStore) -> Self {
        Self {
            table: RwLock::new(table),
            store,
            generation: AtomicU64::new(0),
            saved_generation: Mutex::new(0),
        }
    }

    /// Overlay the persisted snapshot, if any, onto the current table.
    ///
    /// Returns whether a snapshot was found.
    pub fn load_persisted(&self) -> bool {
        match self.store.load() {
            Some(snapshot) => {
                let restored = self.table.write().restore(&snapshot);
                info!(
                    key = self.store.key(),
                    restored,
                    last_update = ?snapshot.last_update,
                    "Loaded persisted exchange rates"
                );
                true
            }
            None => {
                debug!(key = self.store.key(), "Using default exchange rates");
                false
            }
        }
    }

    /// Run `f` against the current table.
    pub fn read<R>(&self, f: impl FnOnce(&RateTable) -> R) -> R {
        f(&self.table.read())
    }

    /// Copy of the current table.
    pub fn table(&self) -> RateTable {
        self.table.read().clone()
    }

    /// Mutate the table and persist it if `f` succeeds.
    ///
    /// `f` must leave the table untouched when it returns an error.
    pub fn update<R>(&self, f: impl FnOnce(&mut RateTable) -> FxResult<R>) -> FxResult<R> {
        let (result, snapshot, generation) = {
            let mut table = self.table.write();
            let result = f(&mut table)?;
            let (snapshot, generation) = self.capture(&table);
            (result, snapshot, generation)
        };
        self.persist(snapshot, generation);
        Ok(result)
    }

    /// Mutate the table unconditionally and persist it.
    pub fn modify<R>(&self, f: impl FnOnce(&mut RateTable) -> R) -> R {
        let (result, snapshot, generation) = {
            let mut table = self.table.write();
            let result = f(&mut table);
            let (snapshot, generation) = self.capture(&table);
            (result, snapshot, generation)
        };
        self.persist(snapshot, generation);
        result
    }

    /// Must be called with the write lock held.
    fn capture(&self, table: &RateTable) -> (RateSnapshot, u64) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (table.snapshot(), generation)
    }

    fn persist(&self, snapshot: RateSnapshot, generation: u64) {
        let mut saved = self.saved_generation.lock();
        if *saved >= generation {
            debug!(generation, saved = *saved, "Skipping superseded snapshot");
            return;
        }

        match self.store.save(&snapshot) {
            Ok(()) => *saved = generation,
            Err(e) => warn!(
                key = self.store.key(),
                error = %e,
                "Failed to persist exchange rates, keeping in-memory table"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FxError;
    use crate::store::{FailingStore, KeyValueStore, MemoryStore};
    use cashbook_common::Currency;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Memory store whose writes take a while.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl KeyValueStore for SlowStore {
        fn get(&self, key: &str) -> FxResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: String) -> FxResult<()> {
            std::thread::sleep(self.delay);
            self.inner.set(key, value)
        }
    }

    fn memory_state() -> (Arc<MemoryStore>, RateState) {
        let backend = Arc::new(MemoryStore::new());
        let store = RateStore::new(backend.clone(), "exchange_rates");
        (backend, RateState::new(RateTable::default(), store))
    }

    #[test]
    fn test_update_writes_through() {
        let (backend, state) = memory_state();

        state
            .update(|t| t.set(&Currency::syp(), 14000.0))
            .unwrap();

        let raw = backend.get("exchange_rates").unwrap().unwrap();
        assert!(raw.contains("\"SYP_TO_USD\":14000"));
    }

    #[test]
    fn test_rejected_update_is_not_persisted() {
        let (backend, state) = memory_state();

        let result = state.update(|t| t.set(&Currency::syp(), -5.0));

        assert!(matches!(result, Err(FxError::InvalidRate { .. })));
        assert!(backend.get("exchange_rates").unwrap().is_none());
        assert_eq!(state.read(|t| t.get(&Currency::syp())), 15000.0);
    }

    #[test]
    fn test_persist_failure_keeps_memory() {
        let store = RateStore::new(Arc::new(FailingStore), "exchange_rates");
        let state = RateState::new(RateTable::default(), store);

        state
            .update(|t| t.set(&Currency::syp(), 14000.0))
            .unwrap();

        assert_eq!(state.read(|t| t.get(&Currency::syp())), 14000.0);
        assert!(!state.load_persisted());
    }

    #[test]
    fn test_load_persisted_overlays_defaults() {
        let (backend, state) = memory_state();
        backend
            .set(
                "exchange_rates",
                r#"{"rates":{"SYP_TO_USD":13500},"autoUpdate":false}"#.to_string(),
            )
            .unwrap();

        assert!(state.load_persisted());

        let table = state.table();
        assert_eq!(table.get(&Currency::syp()), 13500.0);
        assert_eq!(table.get(&Currency::new("TRY")), 32.0);
        assert!(!table.auto_update());
    }

    #[test]
    fn test_reads_do_not_wait_for_save() {
        let backend = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(300),
        });
        let store = RateStore::new(backend.clone(), "exchange_rates");
        let state = Arc::new(RateState::new(RateTable::default(), store));

        let writer = {
            let state = state.clone();
            std::thread::spawn(move || state.update(|t| t.set(&Currency::syp(), 14000.0)))
        };
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let rate = state.read(|t| t.get(&Currency::syp()));
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(rate, 14000.0);

        writer.join().unwrap().unwrap();
        let raw = backend.get("exchange_rates").unwrap().unwrap();
        assert!(raw.contains("14000"));
    }

    #[test]
    fn test_last_mutation_wins_in_store() {
        let (backend, state) = memory_state();
        let state = Arc::new(state);

        let writers: Vec<_> = (1..=8)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    state
                        .update(|t| t.set(&Currency::syp(), 14000.0 + i as f64))
                        .unwrap()
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let final_rate = state.read(|t| t.get(&Currency::syp()));
        let raw = backend.get("exchange_rates").unwrap().unwrap();
        let persisted: RateSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.rates["SYP_TO_USD"], final_rate);
    }
}
