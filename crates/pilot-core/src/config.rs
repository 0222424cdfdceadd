use std::time::Duration;

use serde::Deserialize;

use pilot_model::TimeoutMs;

/// Scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Fixed period of the dispatch loop.
    pub tick_ms: u64,
}

impl SchedulerConfig {
    #[inline]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_ms: 1_000 }
    }
}

/// Correlator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CorrelatorConfig {
    /// Timeout applied by callers that do not pass one explicitly.
    pub default_timeout_ms: TimeoutMs,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.tick_ms, 1_000);

        let cfg: CorrelatorConfig = serde_json::from_str(r#"{"defaultTimeoutMs": 500}"#).unwrap();
        assert_eq!(cfg.default_timeout_ms, 500);
    }

    #[test]
    fn zero_tick_is_clamped() {
        let cfg = SchedulerConfig { tick_ms: 0 };
        assert_eq!(cfg.tick(), Duration::from_millis(1));
    }
}
