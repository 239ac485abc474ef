//! JSON file job store.

use async_trait::async_trait;
use isoforge_core::Job;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::{JobStore, StoredJobs};
use crate::StoreResult;

pub const QUEUE_FILE: &str = "build_queue.json";
pub const HISTORY_FILE: &str = "build_history.json";

/// Suffix given to a jobs file that failed to parse, so the next save
/// does not overwrite it.
pub const CORRUPT_SUFFIX: &str = "corrupt";

/// Stores the queue and history as two JSON arrays in a data directory.
///
/// Every save writes a temporary sibling and renames it over the previous
/// file, so an interrupted write leaves the last good copy in place.
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(QUEUE_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    async fn read_collection(path: &Path) -> Vec<Job> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No persisted jobs file");
                return Vec::new();
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read jobs file, starting empty");
                return Vec::new();
            }
        };

        match serde_json::from_slice::<Vec<Job>>(&bytes) {
            Ok(jobs) => {
                info!(path = %path.display(), count = jobs.len(), "Loaded jobs");
                jobs
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Corrupt jobs file, starting empty");
                Self::set_aside(path).await;
                Vec::new()
            }
        }
    }

    async fn set_aside(path: &Path) {
        let mut aside = path.as_os_str().to_owned();
        aside.push(".");
        aside.push(CORRUPT_SUFFIX);
        let aside = PathBuf::from(aside);

        match tokio::fs::rename(path, &aside).await {
            Ok(()) => warn!(path = %aside.display(), "Moved corrupt jobs file aside"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to move corrupt jobs file aside"),
        }
    }

    async fn write_atomic(path: &Path, jobs: &[Job]) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(jobs)?;
        let tmp = path.with_extension(format!("json.tmp.{}", std::process::id()));

        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonFileStore {
    async fn load(&self) -> StoredJobs {
        StoredJobs {
            queue: Self::read_collection(&self.queue_path()).await,
            history: Self::read_collection(&self.history_path()).await,
        }
    }

    async fn save(&self, queue: &[Job], history: &[Job]) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        // Attempt both files even if the first one fails.
        let queue_result = Self::write_atomic(&self.queue_path(), queue).await;
        let history_result = Self::write_atomic(&self.history_path(), history).await;
        queue_result.and(history_result)
    }
}
