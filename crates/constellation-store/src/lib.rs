//! Run Store (C2): abstract persistence for `Run` records. Spec §4.2
//! intentionally abstracts only `UpsertRun`/`GetRun`; the runtime must not
//! assume anything richer (listing, indexing, TTL) exists.

mod file_store;
mod memory_store;

pub use file_store::FileRunStore;
pub use memory_store::InMemoryRunStore;

use async_trait::async_trait;
use constellation_types::Run;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Idempotent write keyed by `run.id`.
    async fn upsert_run(&self, run: &Run) -> Result<(), StoreError>;
    /// Fetch by id.
    async fn get_run(&self, id: &str) -> Result<Option<Run>, StoreError>;
}
