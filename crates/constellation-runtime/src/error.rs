//! The error taxonomy crossing the Runner API boundary (spec §6/§7),
//! grounded on `tandem-document::DocumentError`'s shape: one
//! `#[derive(Error, Debug)]` enum, `#[from]` for wrapped store errors.

use constellation_stars::AdapterError;
use constellation_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("constellation '{0}' not found")]
    ConstellationNotFound(String),

    #[error("run '{0}' not found")]
    RunNotFound(String),

    #[error("run '{run_id}' is not awaiting confirmation (status: {status})")]
    PreconditionFailed { run_id: String, status: String },

    #[error("Star '{0}' not found")]
    StarNotFound(String),

    #[error("Required variable '{0}' not provided")]
    MissingVariable(String),

    #[error("Upstream node '{node_id}' failed: {error}")]
    UpstreamFailed { node_id: String, error: String },

    #[error("node '{0}' failed after {1} attempts: {2}")]
    RetryExhausted(String, u32, String),

    #[error("{0} nodes failed: {1}")]
    Parallel(usize, AggregatedErrors),

    #[error("star execution failed: {0}")]
    StarExecution(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Carries the list of sibling errors from a failed parallel fan-out
/// (spec §4.6.2/§6: `ParallelExecutionError`).
#[derive(Debug)]
pub struct AggregatedErrors(pub Vec<RunnerError>);

impl std::fmt::Display for AggregatedErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "[{joined}]")
    }
}

impl From<AdapterError> for RunnerError {
    fn from(value: AdapterError) -> Self {
        match value {
            AdapterError::StarNotFound(id) => RunnerError::StarNotFound(id),
            AdapterError::StarFailed(msg) => RunnerError::StarExecution(msg),
        }
    }
}
