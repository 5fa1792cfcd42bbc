//! Error types for the pipeline stages and the orchestrator.

use crate::pipeline::PipelineStage;
use coinledger_core::data::StoreError;
use thiserror::Error;

/// A stage failed for a local reason (the store), not an upstream one.
///
/// Upstream failures never surface here: they become "no data" outcomes.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: StageError,
    },
}
