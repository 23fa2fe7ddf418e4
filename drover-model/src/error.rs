use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid id '{0}': expected 32 lowercase hex characters")]
    InvalidId(String),

    #[error("unknown job status '{0}'")]
    UnknownStatus(String),

    #[error("unknown event type '{0}'")]
    UnknownEventType(String),
}
