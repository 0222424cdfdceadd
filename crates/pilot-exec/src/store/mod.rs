//! Durable key/value storage for executor checkpoints.
//!
//! Stores are synchronous: a checkpoint must be on disk (or wherever the backend keeps it)
//! before a reload-risk handler is allowed to start.

use thiserror::Error;

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "fs")]
mod file;
#[cfg(feature = "fs")]
pub use file::FileStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Storage that survives the loss of the execution context.
pub trait CheckpointStore: Send + Sync + 'static {
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Removing a missing key is not an error.
    fn clear(&self, key: &str) -> Result<(), StoreError>;
}
