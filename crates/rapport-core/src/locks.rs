//! Per-agent serialization of drift read-then-append.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One guard per agent id. Different agents never share a guard.
///
/// Entries live only while some caller holds or waits on them, so the table
/// stays as large as the number of agents in flight.
#[derive(Debug, Default)]
pub struct AgentLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding `agent_id`'s guard, then drop the table entry if
    /// no other caller still references it.
    pub fn with_agent<T>(&self, agent_id: &str, f: impl FnOnce() -> T) -> T {
        let handle = self.handle(agent_id);
        let out = {
            let _guard = Self::acquire(&handle);
            f()
        };
        self.release(agent_id, handle);
        out
    }

    /// The guard for `agent_id`, created on first use.
    pub fn handle(&self, agent_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.table();
        Arc::clone(table.entry(agent_id.to_string()).or_default())
    }

    /// Give back a handle from [`handle`](Self::handle). The entry is removed
    /// once only the table and this handle point at it.
    pub fn release(&self, agent_id: &str, handle: Arc<Mutex<()>>) {
        let mut table = self.table();
        let idle = table
            .get(agent_id)
            .is_some_and(|held| Arc::ptr_eq(held, &handle) && Arc::strong_count(&handle) == 2);
        if idle {
            table.remove(agent_id);
        }
    }

    /// Lock a handle. A poisoned guard protects no data, so it is recovered.
    pub fn acquire(handle: &Mutex<()>) -> MutexGuard<'_, ()> {
        handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
