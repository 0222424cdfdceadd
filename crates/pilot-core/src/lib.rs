//! Controller side of pilot: the task scheduler, the request correlator and the seams they talk through.
//!
//! A [`Scheduler`] tick picks due tasks and hands them to a [`TaskExecutor`] (normally an [`OperationRouter`]).
//! Operations talk to a target through a [`Correlator`], which turns one-way envelope delivery over a
//! [`Transport`] into request/response futures with timeouts.

mod config;
pub use config::{CorrelatorConfig, SchedulerConfig};

mod error;
pub use error::CoreError;

pub mod correlator;
pub use correlator::{Correlator, CorrelatorError};

pub mod events;
pub use events::{Event, EventBus, EventKind, Subscribe};

pub mod registry;
pub use registry::Registry;

pub mod router;
pub use router::{CommandOperation, Operation, OperationRouter};

pub mod scheduler;
pub use scheduler::{
    RunOutcome, ScheduleOptions, Scheduler, TaskExecutor, TaskInfo, executor_fn,
};

pub mod transport;
pub use transport::{ChannelHub, ChannelTransport, Inbound, TargetRef, Transport, TransportError};
