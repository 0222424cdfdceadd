use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a `command` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    /// Action type the target dispatches on.
    pub action: String,
    /// Action parameters; an empty object when omitted.
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

impl CommandPayload {
    pub fn new(action: impl Into<String>, parameters: Value) -> Self {
        Self {
            action: action.into(),
            parameters,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Progress state reported by a `status` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    /// Accepted and running, or deferred while the executor is paused.
    InProgress,
    /// Completed successfully.
    Done,
    /// Handler failed.
    Error,
    /// Execution was cut short by a context teardown; the target will resume it.
    Interrupted,
}

impl CommandStatus {
    /// Returns `true` if the command will not report again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::InProgress => "in-progress",
            CommandStatus::Done => "done",
            CommandStatus::Error => "error",
            CommandStatus::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a `status` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: CommandStatus,
    /// Action type of the command this status refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Handler result, present on `done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure detail, present on `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on `in-progress` when the executor deferred the command because it is paused.
    #[serde(default, skip_serializing_if = "is_false")]
    pub paused: bool,
    /// Set when the status was produced after recovering from a context teardown.
    #[serde(default, skip_serializing_if = "is_false")]
    pub restored: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl StatusPayload {
    fn with_status(status: CommandStatus, action: &str) -> Self {
        Self {
            status,
            action: Some(action.to_string()),
            result: None,
            error: None,
            paused: false,
            restored: false,
        }
    }

    pub fn in_progress(action: &str) -> Self {
        Self::with_status(CommandStatus::InProgress, action)
    }

    pub fn paused(action: &str) -> Self {
        Self {
            paused: true,
            ..Self::with_status(CommandStatus::InProgress, action)
        }
    }

    pub fn done(action: &str, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::with_status(CommandStatus::Done, action)
        }
    }

    pub fn failed(action: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(CommandStatus::Error, action)
        }
    }

    pub fn interrupted(action: &str) -> Self {
        Self::with_status(CommandStatus::Interrupted, action)
    }

    /// Mark the status as produced by the resumption path.
    pub fn restored(mut self) -> Self {
        self.restored = true;
        self
    }
}

/// Body of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_names_are_kebab_case() {
        let json = serde_json::to_string(&CommandStatus::InProgress).unwrap();
        assert_eq!(json, r#""in-progress""#);

        let back: CommandStatus = serde_json::from_str(r#""interrupted""#).unwrap();
        assert_eq!(back, CommandStatus::Interrupted);
    }

    #[test]
    fn terminal_states() {
        assert!(CommandStatus::Done.is_terminal());
        assert!(CommandStatus::Error.is_terminal());
        assert!(!CommandStatus::InProgress.is_terminal());
        assert!(!CommandStatus::Interrupted.is_terminal());
    }

    #[test]
    fn flags_are_omitted_when_unset() {
        let v = serde_json::to_value(StatusPayload::done("click", json!(1))).unwrap();
        assert_eq!(v["status"], "done");
        assert_eq!(v["result"], 1);
        assert!(v.get("paused").is_none());
        assert!(v.get("restored").is_none());
        assert!(v.get("error").is_none());

        let v = serde_json::to_value(StatusPayload::paused("click")).unwrap();
        assert_eq!(v["status"], "in-progress");
        assert_eq!(v["paused"], true);
    }
}
