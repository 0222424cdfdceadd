use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use pilot_model::{Lane, TaskId};

/// Parameters of [`Scheduler::schedule`](super::Scheduler::schedule).
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub task_type: String,
    pub input: Value,
    pub lane: Lane,
    /// Higher runs first among tasks due at the same instant.
    pub priority: i32,
    /// First run time; `None` means due immediately.
    pub run_at: Option<Instant>,
    /// Recurrence period; `None` makes the task one-shot.
    pub interval_ms: Option<u64>,
}

impl ScheduleOptions {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            input: Value::Null,
            lane: Lane::Exclusive,
            priority: 0,
            run_at: None,
            interval_ms: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_lane(mut self, lane: Lane) -> Self {
        self.lane = lane;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn run_at(mut self, at: Instant) -> Self {
        self.run_at = Some(at);
        self
    }

    /// First run `delay` from now.
    pub fn after(self, delay: Duration) -> Self {
        self.run_at(Instant::now() + delay)
    }

    pub fn every_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }
}

/// Result of the most recent run of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
}

/// Scheduler-owned task record.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub input: Value,
    pub lane: Lane,
    pub priority: i32,
    pub next_run_at: Instant,
    pub last_run_at: Option<Instant>,
    pub interval: Option<Duration>,
    pub running: bool,
    pub runs: u64,
    pub last_outcome: Option<RunOutcome>,
}

impl Task {
    pub fn new(id: TaskId, opts: ScheduleOptions, now: Instant) -> Self {
        Self {
            id,
            task_type: opts.task_type,
            input: opts.input,
            lane: opts.lane,
            priority: opts.priority,
            next_run_at: opts.run_at.unwrap_or(now),
            last_run_at: None,
            interval: opts.interval_ms.map(Duration::from_millis),
            running: false,
            runs: 0,
            last_outcome: None,
        }
    }

    #[inline]
    pub fn is_due(&self, now: Instant) -> bool {
        !self.running && self.next_run_at <= now
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            task_type: self.task_type.clone(),
            input: self.input.clone(),
            lane: self.lane,
            priority: self.priority,
            next_run_at: self.next_run_at,
            last_run_at: self.last_run_at,
            interval_ms: self.interval.map(|d| d.as_millis() as u64),
            running: self.running,
            runs: self.runs,
            last_outcome: self.last_outcome.clone(),
        }
    }
}

/// Read-only snapshot of a scheduled task.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    pub task_type: String,
    pub input: Value,
    pub lane: Lane,
    pub priority: i32,
    pub next_run_at: Instant,
    pub last_run_at: Option<Instant>,
    pub interval_ms: Option<u64>,
    pub running: bool,
    /// Completed runs, successful or not.
    pub runs: u64,
    pub last_outcome: Option<RunOutcome>,
}

impl TaskInfo {
    #[inline]
    pub fn is_recurring(&self) -> bool {
        self.interval_ms.is_some()
    }
}
