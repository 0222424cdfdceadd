use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduling class of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lane {
    /// Serialized: at most one exclusive task runs at any moment.
    #[default]
    Exclusive,
    /// Concurrent: every due task starts, only self-overlap is prevented.
    Parallel,
}

impl Lane {
    /// Short symbolic name, used for logging and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Exclusive => "exclusive",
            Lane::Parallel => "parallel",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_string(&Lane::Parallel).unwrap(), r#""parallel""#);
        let back: Lane = serde_json::from_str(r#""exclusive""#).unwrap();
        assert_eq!(back, Lane::Exclusive);
    }
}
