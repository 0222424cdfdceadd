use thiserror::Error;

use crate::correlator::CorrelatorError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no operation registered for task type: {0}")]
    NoOperation(String),

    #[error(transparent)]
    Correlator(#[from] CorrelatorError),

    #[error("invalid payload: {0}")]
    Model(#[from] pilot_model::ModelError),

    #[error("operation failed: {0}")]
    Operation(String),
}
