//! Wire protocol and shared data types for pilot.
//!
//! Everything exchanged between the controller and a target (envelopes, typed actions,
//! execution checkpoints) lives here, together with the identifiers the scheduler hands out.

mod error;
pub use error::ModelError;

mod domain;
pub use domain::*;

mod kind;
pub use kind::*;

mod protocol;
pub use protocol::*;

mod checkpoint;
pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, LogEntry, LogLevel};
