use std::borrow::Borrow;

use pilot_core::{Event, EventKind};
use tracing::{debug, error, info, trace, warn};

/// Field accessors with placeholders for whatever an event kind leaves unset.
pub trait View {
    fn kind(&self) -> EventKind;
    fn as_task(&self) -> String;
    fn as_task_type(&self) -> &str;
    fn as_lane(&self) -> &'static str;
    fn as_action_id(&self) -> &str;
    fn as_action(&self) -> &str;
    fn as_reason(&self) -> &str;
    fn elapsed_ms(&self) -> u64;
    fn has_reason(&self) -> bool;
}

impl<T> View for T
where
    T: Borrow<Event>,
{
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
    #[inline]
    fn as_task(&self) -> String {
        match self.borrow().task {
            Some(id) => id.to_string(),
            None => "unknown".to_string(),
        }
    }
    #[inline]
    fn as_task_type(&self) -> &str {
        self.borrow().task_type.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn as_lane(&self) -> &'static str {
        self.borrow().lane.map(|l| l.as_str()).unwrap_or("unknown")
    }
    #[inline]
    fn as_action_id(&self) -> &str {
        self.borrow()
            .action_id
            .as_ref()
            .map(|id| id.as_str())
            .unwrap_or("unknown")
    }
    #[inline]
    fn as_action(&self) -> &str {
        self.borrow().action.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn as_reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn elapsed_ms(&self) -> u64 {
        self.borrow()
            .elapsed
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
    #[inline]
    fn has_reason(&self) -> bool {
        self.borrow().reason.is_some()
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // scheduler: management
        EventKind::TaskScheduled => "task scheduled",
        EventKind::TaskCanceled => "task canceled",
        EventKind::SchedulerPaused => "scheduler paused; due tasks stay queued",
        EventKind::SchedulerResumed => "scheduler resumed",

        // scheduler: lifecycle
        EventKind::TaskStarting => "task is starting",
        EventKind::TaskSucceeded => "task run succeeded",
        EventKind::TaskFailed => "task run failed",
        EventKind::TaskRescheduled => "recurring task rescheduled",
        EventKind::TaskRetired => "one-shot task retired",

        // correlator
        EventKind::RequestSent => "command sent",
        EventKind::RequestResolved => "command completed",
        EventKind::RequestFailed => "command failed",
        EventKind::RequestTimedOut => "command timed out waiting for completion",
        EventKind::LateResponse => "response arrived after its request settled",
        EventKind::WaitTimedOut => "wait condition timed out",
        EventKind::CorrelatorDisposed => "correlator disposed; pending requests rejected",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        // scheduler: management
        EventKind::TaskScheduled | EventKind::TaskCanceled => {
            debug!(task = %e.as_task(), task_type = e.as_task_type(), lane = e.as_lane(), "{msg}")
        }
        EventKind::SchedulerPaused | EventKind::SchedulerResumed => info!("{msg}"),

        // scheduler: lifecycle
        EventKind::TaskStarting => {
            debug!(task = %e.as_task(), task_type = e.as_task_type(), lane = e.as_lane(), "{msg}")
        }
        EventKind::TaskSucceeded => trace!(
            task = %e.as_task(),
            task_type = e.as_task_type(),
            elapsed_ms = e.elapsed_ms(),
            "{msg}"
        ),
        EventKind::TaskFailed => warn!(
            task = %e.as_task(),
            task_type = e.as_task_type(),
            lane = e.as_lane(),
            reason = e.as_reason(),
            "{msg}"
        ),
        EventKind::TaskRescheduled | EventKind::TaskRetired => {
            trace!(task = %e.as_task(), task_type = e.as_task_type(), "{msg}")
        }

        // correlator
        EventKind::RequestSent | EventKind::RequestResolved => {
            trace!(action_id = e.as_action_id(), action = e.as_action(), "{msg}")
        }
        EventKind::RequestFailed => {
            if e.has_reason() {
                warn!(
                    action_id = e.as_action_id(),
                    action = e.as_action(),
                    reason = e.as_reason(),
                    "{msg}"
                );
            } else {
                warn!(action_id = e.as_action_id(), action = e.as_action(), "{msg}");
            }
        }
        EventKind::RequestTimedOut => warn!(
            action_id = e.as_action_id(),
            action = e.as_action(),
            elapsed_ms = e.elapsed_ms(),
            "{msg}"
        ),
        EventKind::LateResponse => {
            trace!(action_id = e.as_action_id(), reason = e.as_reason(), "{msg}")
        }
        EventKind::WaitTimedOut => debug!(reason = e.as_reason(), "{msg}"),
        EventKind::CorrelatorDisposed => debug!(reason = e.as_reason(), "{msg}"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pilot_model::{ActionId, Lane, TaskId};

    use super::*;

    #[test]
    fn view_fills_placeholders() {
        let e = Event::new(EventKind::TaskStarting);
        assert_eq!(e.as_task(), "unknown");
        assert_eq!(e.as_lane(), "unknown");
        assert_eq!(e.elapsed_ms(), 0);
        assert!(!e.has_reason());
    }

    #[test]
    fn view_reads_populated_fields() {
        let e = Event::new(EventKind::RequestTimedOut)
            .with_task(TaskId::new(7), "sync", Lane::Parallel)
            .with_action(&ActionId::from("a-1"), Some("click"))
            .with_elapsed(Duration::from_millis(1500));
        assert_eq!(e.as_task(), "task-7");
        assert_eq!(e.as_lane(), "parallel");
        assert_eq!(e.as_action_id(), "a-1");
        assert_eq!(e.as_action(), "click");
        assert_eq!(e.elapsed_ms(), 1500);
    }

    #[test]
    fn every_kind_logs_without_a_subscriber() {
        for kind in [
            EventKind::TaskScheduled,
            EventKind::TaskFailed,
            EventKind::RequestFailed,
            EventKind::LateResponse,
            EventKind::CorrelatorDisposed,
        ] {
            assert!(!message_for(kind).is_empty());
            log_event(Event::new(kind).with_reason("r"));
        }
    }
}
