//! SQLite-backed `DriftStore`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rapport_core::{DriftRecord, DriftStore, ProviderError};

use crate::error::Result;
use crate::store::Store;

/// History window handed to the tracker on each read.
pub const HISTORY_LIMIT: usize = 64;

const PROVIDER: &str = "drift";

/// Serializes access to one SQLite connection so the store can be shared
/// across engine threads.
pub struct SqliteDriftStore {
    store: Mutex<Store>,
}

impl SqliteDriftStore {
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    fn lock(&self) -> std::result::Result<MutexGuard<'_, Store>, ProviderError> {
        self.store
            .lock()
            .map_err(|_| ProviderError::unavailable(PROVIDER, "store lock poisoned"))
    }
}

impl DriftStore for SqliteDriftStore {
    fn read(&self, agent_id: &str) -> std::result::Result<Vec<DriftRecord>, ProviderError> {
        self.lock()?
            .drift_history(agent_id, Some(HISTORY_LIMIT))
            .map_err(|e| ProviderError::unavailable(PROVIDER, e.to_string()))
    }

    fn append(&self, record: &DriftRecord) -> std::result::Result<(), ProviderError> {
        self.lock()?
            .append_drift(record)
            .map_err(|e| ProviderError::unavailable(PROVIDER, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapport_core::{BehaviorDriftTracker, BehaviorPhase, Timestamp};
    use std::sync::Arc;

    #[test]
    fn test_tracker_over_sqlite() {
        let store = SqliteDriftStore::open_in_memory().unwrap();
        let tracker = BehaviorDriftTracker::default();

        for hour in 0..3u64 {
            let history = store.read("anon").unwrap();
            let record =
                tracker.observe("anon", &[0.6, 0.8], Timestamp(hour * 3_600_000), &history);
            store.append(&record).unwrap();
        }

        let history = store.read("anon").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(tracker.current_phase(&history), Some(BehaviorPhase::Settled));
    }

    #[test]
    fn test_read_is_bounded() {
        let store = SqliteDriftStore::open_in_memory().unwrap();
        let tracker = BehaviorDriftTracker::default();
        for i in 0..(HISTORY_LIMIT as u64 + 10) {
            let record = tracker.observe("anon", &[1.0], Timestamp(i), &[]);
            store.append(&record).unwrap();
        }
        let history = store.read("anon").unwrap();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].timestamp, Timestamp(10));
    }

    #[test]
    fn test_shared_across_threads() {
        let store: Arc<dyn DriftStore> = Arc::new(SqliteDriftStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let tracker = BehaviorDriftTracker::default();
                    let agent = format!("agent-{t}");
                    for i in 0..5u64 {
                        let history = store.read(&agent).unwrap();
                        let r = tracker.observe(&agent, &[1.0, t as f64], Timestamp(i), &history);
                        store.append(&r).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..4 {
            assert_eq!(store.read(&format!("agent-{t}")).unwrap().len(), 5);
        }
    }
}
