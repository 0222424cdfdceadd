//! Target side of pilot: runs commands, survives context teardown.
//!
//! An [`Executor`] dispatches inbound `command` envelopes to registered handlers. Handlers that
//! may destroy their own execution context declare a [`ReloadRisk`]; the executor checkpoints
//! before running them and [`Executor::resume_from_checkpoint`] settles the command in the next
//! context.

mod config;
pub use config::ExecutorConfig;

mod error;
pub use error::{ExecError, ExecResult, HandlerError};

pub mod handler;
pub use handler::{
    ActionHandler, CommandHandler, HandlerContext, HandlerRegistry, ReloadRisk, StaticLocation,
    TargetContext,
};

pub mod store;
pub use store::{CheckpointStore, MemoryStore, StoreError};
#[cfg(feature = "fs")]
pub use store::FileStore;

mod executor;
pub use executor::{Executor, ExecutorBuilder, Resumption};

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult, HandlerError};
    pub use crate::{
        ActionHandler, CommandHandler, Executor, HandlerContext, ReloadRisk, Resumption,
        TargetContext,
    };
}
