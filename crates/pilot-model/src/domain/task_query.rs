use crate::Lane;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Query parameters for listing scheduled tasks with filtering and pagination.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub lane: Option<Lane>,
    pub kind: Option<String>,
    pub running: Option<bool>,
    pub limit: usize,
    pub offset: usize,
}

/// Result of a paginated task query.
#[derive(Debug, Clone)]
pub struct TaskPage<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self {
            lane: None,
            kind: None,
            running: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn with_lane(mut self, lane: Lane) -> Self {
        self.lane = Some(lane);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.min(MAX_LIMIT);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        let q = TaskQuery::new().with_limit(50_000);
        assert_eq!(q.limit, MAX_LIMIT);
    }

    #[test]
    fn defaults() {
        let q = TaskQuery::new();
        assert_eq!(q.limit, DEFAULT_LIMIT);
        assert_eq!(q.offset, 0);
        assert!(q.lane.is_none() && q.kind.is_none() && q.running.is_none());
    }
}
