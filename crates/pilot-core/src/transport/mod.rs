//! One-way envelope delivery between the controller and its targets.
//!
//! Delivery is fire-and-forget: a successful [`Transport::transmit`] only means the envelope was handed off,
//! never that the target processed it. Confirmation comes from the protocol itself (status/error envelopes).

mod channel;
pub use channel::{ChannelHub, ChannelTransport, Inbound};

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use pilot_model::Envelope;

/// Address of a transport peer (a target context, or the controller itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetRef(String);

impl TargetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("target unreachable: {0}")]
    Unreachable(TargetRef),

    #[error("transport closed")]
    Closed,

    #[error("transport failure: {0}")]
    Other(String),
}

/// Outbound half of a transport.
///
/// Inbound delivery is wired by the embedding application: the controller feeds received envelopes into
/// [`Correlator::handle_inbound`](crate::Correlator::handle_inbound), the target feeds commands into its executor.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn transmit(&self, target: &TargetRef, envelope: Envelope) -> Result<(), TransportError>;
}
