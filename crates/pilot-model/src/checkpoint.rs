use serde::{Deserialize, Serialize};

use crate::{CommandEnvelope, CommandStatus, ModelError, TimestampMs};

/// Schema version written into every [`Checkpoint`].
pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable snapshot of the target executor taken before a reload-risk action.
///
/// Written through a checkpoint store, read back once when the target context (re)initializes, then cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: u32,
    pub current_command: Option<CommandEnvelope>,
    pub command_status: CommandStatus,
    pub paused: bool,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Checkpoint {
    pub fn new(
        current_command: Option<CommandEnvelope>,
        command_status: CommandStatus,
        paused: bool,
        logs: Vec<LogEntry>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            current_command,
            command_status,
            paused,
            logs,
        }
    }

    pub fn encode(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored checkpoint, rejecting records written with another schema version.
    pub fn decode(raw: &str) -> Result<Self, ModelError> {
        let cp: Checkpoint = serde_json::from_str(raw)?;
        if cp.version != CHECKPOINT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: cp.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        Ok(cp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of the executor's activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: TimestampMs,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: crate::now_ms(),
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{ActionId, CommandPayload, Message};

    fn sample() -> Checkpoint {
        let cmd = Message::new(
            ActionId::from("a-1"),
            CommandPayload::new("click", json!({"selector": "#go"})),
        );
        Checkpoint::new(
            Some(cmd),
            CommandStatus::InProgress,
            false,
            vec![LogEntry::new(LogLevel::Info, "clicking")],
        )
    }

    #[test]
    fn encode_uses_camel_case() {
        let raw = sample().encode().unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["version"], CHECKPOINT_VERSION);
        assert_eq!(v["commandStatus"], "in-progress");
        assert_eq!(v["currentCommand"]["payload"]["action"], "click");
    }

    #[test]
    fn decode_accepts_own_output() {
        let cp = sample();
        let back = Checkpoint::decode(&cp.encode().unwrap()).unwrap();
        assert_eq!(back, cp);
    }

    #[test]
    fn decode_rejects_other_versions() {
        let mut v = serde_json::to_value(sample()).unwrap();
        v["version"] = json!(7);
        let err = Checkpoint::decode(&v.to_string()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::UnsupportedVersion { found: 7, expected: CHECKPOINT_VERSION }
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(Checkpoint::decode("{not json"), Err(ModelError::Serde(_))));
    }
}
