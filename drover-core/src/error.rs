use drover_model::{JobId, ModelError, WorkerId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(String),

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("url signing failed: {0}")]
    Sign(String),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("worker {0} not found")]
    WorkerNotFound(WorkerId),

    #[error("invalid lease or worker_id")]
    InvalidLease,

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        CoreError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Store(err.to_string())
    }
}
