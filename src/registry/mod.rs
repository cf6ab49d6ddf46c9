//! Agent registry — the single owner of per-agent state.
//!
//! Combines the durable store with a per-agent lock map. Heartbeat ingestion
//! and the watchdog are the only two mutators; both acquire the agent's lock
//! for the duration of one read-modify-write and release it before any
//! notifier call, so a slow alert transport never stalls ingestion.

pub mod model;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::MonitorError;
use crate::registry::model::AgentRow;
use crate::storage::Storage;

pub struct AgentRegistry {
    storage: Arc<Storage>,
    /// One lightweight mutex per agent name, created lazily and never
    /// removed — bounded by the number of distinct agents, which is small.
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// The lock serializing read-modify-write cycles for one agent.
    ///
    /// The map guard is dropped before the returned mutex is awaited, so
    /// operations on different agents proceed without contention.
    pub fn agent_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("agent lock map poisoned");
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Latest committed state of every agent — no partial records, since all
    /// writes are transactional.
    pub async fn status_snapshot(&self) -> Result<Vec<AgentRow>, MonitorError> {
        self.storage.list_agents().await
    }
}
