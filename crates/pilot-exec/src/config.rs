use serde::{Deserialize, Serialize};

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Store key the checkpoint is written under.
    pub checkpoint_key: String,
    /// Upper bound on retained handler log entries; the oldest are dropped first.
    pub max_logs: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            checkpoint_key: "pilot.checkpoint".to_string(),
            max_logs: 100,
        }
    }
}

impl ExecutorConfig {
    pub fn with_checkpoint_key(mut self, key: impl Into<String>) -> Self {
        self.checkpoint_key = key.into();
        self
    }

    pub fn with_max_logs(mut self, max: usize) -> Self {
        self.max_logs = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: ExecutorConfig = serde_json::from_str(r#"{"maxLogs": 5}"#).unwrap();
        assert_eq!(cfg.max_logs, 5);
        assert_eq!(cfg.checkpoint_key, "pilot.checkpoint");
    }
}
