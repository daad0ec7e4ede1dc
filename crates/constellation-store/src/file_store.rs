use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use constellation_types::Run;
use tokio::fs;
use tokio::sync::RwLock;

use crate::{RunStore, StoreError};

const RUNS_FILE: &str = "runs.json";

/// File-backed `RunStore`, grounded on `tandem-core::storage::Storage`: an
/// `Arc`-shared, `RwLock<HashMap<..>>` in-memory cache backed by a single
/// JSON file under a base directory. Every upsert rewrites the whole file,
/// which keeps the on-disk shape trivially inspectable — the same tradeoff
/// the teacher makes for its `sessions.json`.
pub struct FileRunStore {
    path: PathBuf,
    runs: RwLock<HashMap<String, Run>>,
}

impl FileRunStore {
    pub async fn new(base: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        let path = base.join(RUNS_FILE);
        let runs = if path.exists() {
            let raw = fs::read_to_string(&path).await?;
            serde_json::from_str::<HashMap<String, Run>>(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            runs: RwLock::new(runs),
        })
    }

    async fn flush(&self, runs: &HashMap<String, Run>) -> Result<(), StoreError> {
        let serialized = serde_json::to_string_pretty(runs)?;
        fs::write(&self.path, serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn upsert_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        runs.insert(run.id.clone(), run.clone());
        self.flush(&runs).await
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).await.unwrap();
        let run = Run::new("run_abc", "c", "Constellation", StdHashMap::new());
        store.upsert_run(&run).await.unwrap();

        // A fresh store over the same directory recovers the run — this is
        // the survive-a-restart property spec §4.2 requires.
        let reopened = FileRunStore::new(dir.path()).await.unwrap();
        let loaded = reopened.get_run("run_abc").await.unwrap().unwrap();
        assert_eq!(loaded.id, "run_abc");
    }

    #[tokio::test]
    async fn datetimes_round_trip_as_utc() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).await.unwrap();
        let run = Run::new("run_abc", "c", "Constellation", StdHashMap::new());
        let started_at = run.started_at;
        store.upsert_run(&run).await.unwrap();

        let reopened = FileRunStore::new(dir.path()).await.unwrap();
        let loaded = reopened.get_run("run_abc").await.unwrap().unwrap();
        assert_eq!(loaded.started_at, started_at);
    }
}
