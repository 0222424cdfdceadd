mod action_id;
pub use action_id::ActionId;

mod task_id;
pub use task_id::TaskId;

mod task_query;
pub use task_query::{TaskPage, TaskQuery};

use std::time::{SystemTime, UNIX_EPOCH};

/// Timeout value in milliseconds.
pub type TimeoutMs = u64;

/// Wall-clock timestamp in milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// Current wall-clock time as [`TimestampMs`].
///
/// A clock set before the epoch yields `0` rather than failing.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
