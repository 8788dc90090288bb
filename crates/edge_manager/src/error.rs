use edge_protocol::{InvalidTransition, PipelineStatus};
use edge_runtime::{OffsetStoreError, PreviewError};
use edge_state_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("cannot reset the offset while the pipeline is {0}")]
    ResetRefused(PipelineStatus),

    #[error("cannot commit an offset while the pipeline is {0}")]
    CommitRefused(PipelineStatus),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("offset store: {0}")]
    Offset(#[from] OffsetStoreError),

    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("pipeline '{0}' does not exist")]
    NotFound(String),

    #[error("pipeline '{pipeline_id}' is {status}")]
    Active {
        pipeline_id: String,
        status: PipelineStatus,
    },

    #[error("preview '{0}' does not exist")]
    PreviewNotFound(String),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("offset store: {0}")]
    Offset(#[from] OffsetStoreError),

    #[error(transparent)]
    Preview(#[from] PreviewError),
}
