use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use pilot_model::{ActionId, LogEntry, LogLevel};

/// Read-only view of the environment a target executes in.
pub trait TargetContext: Send + Sync + 'static {
    /// Where the context currently is, if it has a notion of location.
    fn location(&self) -> Option<String>;
}

/// Context with a fixed location.
#[derive(Debug, Clone, Default)]
pub struct StaticLocation(pub Option<String>);

impl StaticLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self(Some(location.into()))
    }
}

impl TargetContext for StaticLocation {
    fn location(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Bounded log shared between handlers and the checkpoint.
#[derive(Debug, Clone)]
pub(crate) struct LogBook {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    max: usize,
}

impl LogBook {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max,
        }
    }

    pub(crate) fn push(&self, entry: LogEntry) {
        if self.max == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.max {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub(crate) fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn restore(&self, logs: Vec<LogEntry>) {
        for entry in logs {
            self.push(entry);
        }
    }
}

/// Per-invocation context handed to a command handler.
pub struct HandlerContext {
    action_id: ActionId,
    restored: bool,
    target: Arc<dyn TargetContext>,
    logs: LogBook,
}

impl HandlerContext {
    pub(crate) fn new(
        action_id: ActionId,
        restored: bool,
        target: Arc<dyn TargetContext>,
        logs: LogBook,
    ) -> Self {
        Self {
            action_id,
            restored,
            target,
            logs,
        }
    }

    pub fn action_id(&self) -> &ActionId {
        &self.action_id
    }

    /// `true` when this run re-executes a command recovered from a checkpoint.
    pub fn restored(&self) -> bool {
        self.restored
    }

    pub fn target(&self) -> &dyn TargetContext {
        self.target.as_ref()
    }

    /// Record a line in the executor log. Entries are carried across reloads in the checkpoint.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry::new(level, message));
    }
}
