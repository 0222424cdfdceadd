//! Lifecycle events published by the scheduler and the correlator.
//!
//! Observability lives outside this crate: logging and metrics are [`Subscribe`] implementations
//! registered on an [`EventBus`].

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use tracing::error;

use pilot_model::{ActionId, Lane, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // scheduler: management
    TaskScheduled,
    TaskCanceled,
    SchedulerPaused,
    SchedulerResumed,

    // scheduler: lifecycle
    TaskStarting,
    TaskSucceeded,
    TaskFailed,
    TaskRescheduled,
    TaskRetired,

    // correlator
    RequestSent,
    RequestResolved,
    RequestFailed,
    RequestTimedOut,
    LateResponse,
    WaitTimedOut,
    CorrelatorDisposed,
}

/// A single lifecycle notification.
///
/// Only the fields relevant to `kind` are populated.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub task: Option<TaskId>,
    pub task_type: Option<String>,
    pub lane: Option<Lane>,
    pub action_id: Option<ActionId>,
    pub action: Option<String>,
    pub reason: Option<String>,
    pub elapsed: Option<Duration>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            task: None,
            task_type: None,
            lane: None,
            action_id: None,
            action: None,
            reason: None,
            elapsed: None,
        }
    }

    pub fn with_task(mut self, id: TaskId, task_type: &str, lane: Lane) -> Self {
        self.task = Some(id);
        self.task_type = Some(task_type.to_string());
        self.lane = Some(lane);
        self
    }

    pub fn with_action(mut self, id: &ActionId, action: Option<&str>) -> Self {
        self.action_id = Some(id.clone());
        self.action = action.map(str::to_string);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

/// Receiver of lifecycle events.
///
/// Called synchronously on the publishing path; implementations must be cheap and must not block.
pub trait Subscribe: Send + Sync + 'static {
    fn on_event(&self, event: &Event);

    fn name(&self) -> &'static str {
        "subscriber"
    }
}

/// Fan-out of events to a fixed set of subscribers.
///
/// A panicking subscriber is logged and skipped; it never reaches the scheduler loop.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Vec<Arc<dyn Subscribe>>>,
}

impl EventBus {
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            subscribers: Arc::new(subscribers),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn publish(&self, event: Event) {
        for sub in self.subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| sub.on_event(&event))).is_err() {
                error!(subscriber = sub.name(), kind = ?event.kind, "subscriber panicked while processing an event");
            }
        }
    }
}
