use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
