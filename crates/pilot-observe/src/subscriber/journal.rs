use pilot_core::{Event, Subscribe};

use crate::subscriber::view::log_event;

/// Writes every scheduler and correlator event to the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct Journal;

impl Journal {
    pub fn new() -> Self {
        Self
    }
}

impl Subscribe for Journal {
    fn on_event(&self, event: &Event) {
        log_event(event);
    }

    fn name(&self) -> &'static str {
        "journal"
    }
}
