//! Job store trait and implementations.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use isoforge_core::Job;

use crate::StoreResult;

/// The two persisted collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredJobs {
    /// Jobs not yet finished, in FIFO order.
    pub queue: Vec<Job>,
    /// Finished jobs, in completion order.
    pub history: Vec<Job>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Read persisted state.
    ///
    /// Never fails: missing or unreadable collections come back empty and
    /// the condition is logged.
    async fn load(&self) -> StoredJobs;

    /// Replace persisted state with the given collections.
    async fn save(&self, queue: &[Job], history: &[Job]) -> StoreResult<()>;
}
