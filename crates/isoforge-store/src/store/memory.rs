//! In-memory job store.

use async_trait::async_trait;
use isoforge_core::Job;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{JobStore, StoredJobs};
use crate::{StoreError, StoreResult};

/// Keeps persisted state in process memory.
///
/// Used for ephemeral servers and tests. `set_failing(true)` makes every save
/// return an error without touching the stored state.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoredJobs>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with previously persisted collections.
    pub fn with_jobs(queue: Vec<Job>, history: Vec<Job>) -> Self {
        Self {
            state: Mutex::new(StoredJobs { queue, history }),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Current persisted state.
    pub async fn snapshot(&self) -> StoredJobs {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn load(&self) -> StoredJobs {
        self.state.lock().await.clone()
    }

    async fn save(&self, queue: &[Job], history: &[Job]) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }
        let mut state = self.state.lock().await;
        state.queue = queue.to_vec();
        state.history = history.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
