use serde_json::Value;
use thiserror::Error;

use pilot_model::{ActionId, ModelError, TimeoutMs};

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: TimeoutMs },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("target reported failure: {message}")]
    Remote {
        message: String,
        details: Option<Value>,
    },

    #[error("correlator disposed")]
    Disposed,

    #[error("action id already pending: {0}")]
    DuplicateActionId(ActionId),

    #[error("invalid payload: {0}")]
    Decode(#[from] ModelError),
}

impl CorrelatorError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, CorrelatorError::Timeout { .. })
    }
}
