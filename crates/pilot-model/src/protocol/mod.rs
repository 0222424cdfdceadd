mod envelope;
pub use envelope::{CommandEnvelope, Envelope, EnvelopeKind, Message};

mod payload;
pub use payload::{CommandPayload, CommandStatus, ErrorPayload, StatusPayload};

mod action;
pub use action::{Action, Navigate, NavigateOutput, NavigateParams};
