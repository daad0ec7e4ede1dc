use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use constellation_types::Run;
use tokio::sync::RwLock;

use crate::{RunStore, StoreError};

/// In-process `RunStore`, no filesystem I/O. Intended for tests and for
/// embedders supplying their own durable backend elsewhere.
#[derive(Clone, Default)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<String, Run>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn upsert_run(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        Ok(())
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
    async fn upsert_then_get_round_trips() {
        let store = InMemoryRunStore::new();
        let run = Run::new("run_abc", "c", "Constellation", StdHashMap::new());
        store.upsert_run(&run).await.unwrap();
        let loaded = store.get_run("run_abc").await.unwrap().unwrap();
        assert_eq!(loaded.id, "run_abc");
    }

    #[tokio::test]
    async fn get_unknown_id_returns_none() {
        let store = InMemoryRunStore::new();
        assert!(store.get_run("run_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let store = InMemoryRunStore::new();
        let mut run = Run::new("run_abc", "c", "Constellation", StdHashMap::new());
        store.upsert_run(&run).await.unwrap();
        run.final_output = Some("done".into());
        store.upsert_run(&run).await.unwrap();
        let loaded = store.get_run("run_abc").await.unwrap().unwrap();
        assert_eq!(loaded.final_output, Some("done".to_string()));
    }
}
