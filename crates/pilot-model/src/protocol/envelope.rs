use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ActionId, CommandPayload, ErrorPayload, StatusPayload, TimestampMs, now_ms};

/// Header and payload shared by every envelope variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message<P> {
    pub action_id: ActionId,
    pub timestamp: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub payload: P,
}

impl<P> Message<P> {
    /// Build a message stamped with the current wall-clock time.
    pub fn new(action_id: ActionId, payload: P) -> Self {
        Self {
            action_id,
            timestamp: now_ms(),
            correlation_id: None,
            payload,
        }
    }
}

/// A command as sent by the controller.
pub type CommandEnvelope = Message<CommandPayload>;

impl CommandEnvelope {
    /// Action type string this command dispatches on.
    #[inline]
    pub fn action(&self) -> &str {
        &self.payload.action
    }
}

/// Discriminant of [`Envelope`], used to subscribe to a class of messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeKind {
    Command,
    Status,
    Event,
    Error,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Command => "command",
            EnvelopeKind::Status => "status",
            EnvelopeKind::Event => "event",
            EnvelopeKind::Error => "error",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of messages exchanged between controller and target.
///
/// Commands travel controller → target; status, event and error envelopes travel target → controller.
/// On the wire the variant is carried in a `type` field next to the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    Command(CommandEnvelope),
    Status(Message<StatusPayload>),
    Event(Message<Value>),
    Error(Message<ErrorPayload>),
}

impl Envelope {
    pub fn command(action_id: ActionId, action: impl Into<String>, parameters: Value) -> Self {
        Envelope::Command(Message::new(action_id, CommandPayload::new(action, parameters)))
    }

    pub fn status(action_id: ActionId, payload: StatusPayload) -> Self {
        Envelope::Status(Message::new(action_id, payload))
    }

    pub fn event(action_id: ActionId, payload: Value) -> Self {
        Envelope::Event(Message::new(action_id, payload))
    }

    pub fn error(action_id: ActionId, payload: ErrorPayload) -> Self {
        Envelope::Error(Message::new(action_id, payload))
    }

    /// Attach a correlation id, replacing any previous one.
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        let id = Some(id.into());
        match &mut self {
            Envelope::Command(m) => m.correlation_id = id,
            Envelope::Status(m) => m.correlation_id = id,
            Envelope::Event(m) => m.correlation_id = id,
            Envelope::Error(m) => m.correlation_id = id,
        }
        self
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Command(_) => EnvelopeKind::Command,
            Envelope::Status(_) => EnvelopeKind::Status,
            Envelope::Event(_) => EnvelopeKind::Event,
            Envelope::Error(_) => EnvelopeKind::Error,
        }
    }

    pub fn action_id(&self) -> &ActionId {
        match self {
            Envelope::Command(m) => &m.action_id,
            Envelope::Status(m) => &m.action_id,
            Envelope::Event(m) => &m.action_id,
            Envelope::Error(m) => &m.action_id,
        }
    }

    pub fn timestamp(&self) -> TimestampMs {
        match self {
            Envelope::Command(m) => m.timestamp,
            Envelope::Status(m) => m.timestamp,
            Envelope::Event(m) => m.timestamp,
            Envelope::Error(m) => m.timestamp,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Envelope::Command(m) => m.correlation_id.as_deref(),
            Envelope::Status(m) => m.correlation_id.as_deref(),
            Envelope::Event(m) => m.correlation_id.as_deref(),
            Envelope::Error(m) => m.correlation_id.as_deref(),
        }
    }

    /// Payload rendered as a JSON value, whatever the variant.
    pub fn payload_value(&self) -> Value {
        let v = match self {
            Envelope::Command(m) => serde_json::to_value(&m.payload),
            Envelope::Status(m) => serde_json::to_value(&m.payload),
            Envelope::Event(m) => Ok(m.payload.clone()),
            Envelope::Error(m) => serde_json::to_value(&m.payload),
        };
        v.unwrap_or_default()
    }
}
