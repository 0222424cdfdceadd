use thiserror::Error;

/// Failure reported by a command handler; becomes an `error` status for the command.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("target element not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Failure while writing the durable checkpoint.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("checkpoint store: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] pilot_model::ModelError),
}

pub type ExecResult<T> = Result<T, ExecError>;
