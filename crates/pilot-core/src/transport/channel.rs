use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use pilot_model::Envelope;

use super::{TargetRef, Transport, TransportError};

/// An envelope together with the peer that sent it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub source: TargetRef,
    pub envelope: Envelope,
}

type Mailboxes = HashMap<TargetRef, mpsc::UnboundedSender<Inbound>>;

/// In-process switchboard connecting named peers through unbounded channels.
///
/// Dropping a peer's receiver (or calling [`ChannelHub::disconnect`]) makes it unreachable,
/// which is how tests simulate a target context being torn down.
#[derive(Clone, Default)]
pub struct ChannelHub {
    mailboxes: Arc<RwLock<Mailboxes>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peer, returning its outbound transport and inbound mailbox.
    ///
    /// Connecting an already known name replaces the previous mailbox.
    pub fn connect(&self, me: TargetRef) -> (ChannelTransport, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(me.clone(), tx);

        let transport = ChannelTransport {
            hub: self.clone(),
            me,
        };
        (transport, rx)
    }

    /// Detach a peer; later deliveries to it fail with [`TransportError::Unreachable`].
    pub fn disconnect(&self, peer: &TargetRef) -> bool {
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer)
            .is_some()
    }

    fn deliver(&self, from: &TargetRef, to: &TargetRef, envelope: Envelope) -> Result<(), TransportError> {
        let mailboxes = self.mailboxes.read().unwrap_or_else(PoisonError::into_inner);
        let tx = mailboxes
            .get(to)
            .ok_or_else(|| TransportError::Unreachable(to.clone()))?;

        trace!(from = %from, to = %to, kind = %envelope.kind(), action_id = %envelope.action_id(), "deliver");
        tx.send(Inbound {
            source: from.clone(),
            envelope,
        })
        .map_err(|_| TransportError::Unreachable(to.clone()))
    }
}

/// Outbound transport of one peer attached to a [`ChannelHub`].
#[derive(Clone)]
pub struct ChannelTransport {
    hub: ChannelHub,
    me: TargetRef,
}

impl ChannelTransport {
    pub fn local(&self) -> &TargetRef {
        &self.me
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn transmit(&self, target: &TargetRef, envelope: Envelope) -> Result<(), TransportError> {
        self.hub.deliver(&self.me, target, envelope)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use pilot_model::ActionId;

    #[tokio::test]
    async fn delivers_with_source() {
        let hub = ChannelHub::new();
        let (ctl, _ctl_rx) = hub.connect(TargetRef::from("controller"));
        let (_tab, mut tab_rx) = hub.connect(TargetRef::from("tab-1"));

        let env = Envelope::command(ActionId::from("a"), "noop", json!({}));
        ctl.transmit(&TargetRef::from("tab-1"), env.clone()).await.unwrap();

        let got = tab_rx.recv().await.unwrap();
        assert_eq!(got.source.as_str(), "controller");
        assert_eq!(got.envelope, env);
    }

    #[tokio::test]
    async fn unknown_or_disconnected_peer_is_unreachable() {
        let hub = ChannelHub::new();
        let (ctl, _rx) = hub.connect(TargetRef::from("controller"));
        let env = Envelope::command(ActionId::from("a"), "noop", json!({}));

        let err = ctl.transmit(&TargetRef::from("ghost"), env.clone()).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));

        let (_tab, tab_rx) = hub.connect(TargetRef::from("tab"));
        drop(tab_rx);
        let err = ctl.transmit(&TargetRef::from("tab"), env.clone()).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));

        let (_tab, _tab_rx) = hub.connect(TargetRef::from("tab"));
        assert!(hub.disconnect(&TargetRef::from("tab")));
        assert!(ctl.transmit(&TargetRef::from("tab"), env).await.is_err());
    }
}
