//! Request/response matching over a one-way transport.
//!
//! Every [`Correlator::send`] registers a pending entry keyed by its action id and owns a timer task.
//! The entry is removed by whichever comes first: a terminal status/error envelope, the timer, a transport
//! failure or [`Correlator::dispose`]. Removal happens under the state lock, so exactly one of them
//! reaches the caller.

mod error;
pub use error::CorrelatorError;

use std::{
    collections::HashMap,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use serde_json::Value;
use tokio::{sync::oneshot, task::AbortHandle, time::Instant};
use tracing::{debug, info, instrument, trace, warn};

use pilot_model::{Action, ActionId, CommandStatus, Envelope, EnvelopeKind, TimeoutMs};

use crate::{
    config::CorrelatorConfig,
    events::{Event, EventBus, EventKind},
    transport::{TargetRef, Transport},
};

type Reply = Result<Value, CorrelatorError>;

/// Match condition of a [`Correlator::wait_for`] subscription.
pub type Predicate = Box<dyn Fn(&Envelope) -> bool + Send + Sync>;

struct Pending {
    action: String,
    tx: oneshot::Sender<Reply>,
    timer: AbortHandle,
    sent_at: Instant,
}

struct Waiter {
    kind: EnvelopeKind,
    action_id: Option<ActionId>,
    predicate: Predicate,
    tx: oneshot::Sender<Reply>,
    timer: AbortHandle,
}

#[derive(Default)]
struct State {
    pending: HashMap<ActionId, Pending>,
    waiters: HashMap<u64, Waiter>,
    next_waiter: u64,
    disposed: bool,
}

enum Expiry {
    Request(ActionId),
    Wait(u64),
}

struct Shared {
    target: TargetRef,
    transport: Arc<dyn Transport>,
    config: CorrelatorConfig,
    events: EventBus,
    state: Mutex<State>,
}

/// Controller-side correlator bound to one target.
///
/// Cheap to clone; clones share the same pending table.
#[derive(Clone)]
pub struct Correlator {
    shared: Arc<Shared>,
}

pub struct CorrelatorBuilder {
    target: TargetRef,
    transport: Arc<dyn Transport>,
    config: CorrelatorConfig,
    events: EventBus,
}

impl CorrelatorBuilder {
    pub fn with_config(mut self, config: CorrelatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Correlator {
        Correlator {
            shared: Arc::new(Shared {
                target: self.target,
                transport: self.transport,
                config: self.config,
                events: self.events,
                state: Mutex::new(State::default()),
            }),
        }
    }
}

impl Correlator {
    pub fn builder(target: TargetRef, transport: Arc<dyn Transport>) -> CorrelatorBuilder {
        CorrelatorBuilder {
            target,
            transport,
            config: CorrelatorConfig::default(),
            events: EventBus::default(),
        }
    }

    #[inline]
    pub fn target(&self) -> &TargetRef {
        &self.shared.target
    }

    #[inline]
    pub fn default_timeout_ms(&self) -> TimeoutMs {
        self.shared.config.default_timeout_ms
    }

    /// Send a command under a freshly generated action id and wait for its terminal status.
    pub async fn send(&self, action: &str, parameters: Value, timeout_ms: TimeoutMs) -> Reply {
        self.send_as(ActionId::generate(), action, parameters, timeout_ms)
            .await
    }

    /// Like [`send`](Self::send) with a caller-chosen action id.
    ///
    /// Useful when a [`wait_for`](Self::wait_for) on the same id has to be set up before the command leaves.
    #[instrument(level = "debug", skip(self, parameters), fields(peer = %self.shared.target))]
    pub async fn send_as(
        &self,
        action_id: ActionId,
        action: &str,
        parameters: Value,
        timeout_ms: TimeoutMs,
    ) -> Reply {
        let rx = self.register(&action_id, action, timeout_ms)?;
        let envelope = Envelope::command(action_id.clone(), action, parameters);

        self.shared
            .events
            .publish(Event::new(EventKind::RequestSent).with_action(&action_id, Some(action)));

        if let Err(e) = self
            .shared
            .transport
            .transmit(&self.shared.target, envelope)
            .await
        {
            // If the entry is already gone it was settled while transmitting; report that outcome instead.
            if let Some(p) = self.shared.take_pending(&action_id) {
                p.timer.abort();
                warn!(%action_id, action, error = %e, "transmit failed");
                self.shared.events.publish(
                    Event::new(EventKind::RequestFailed)
                        .with_action(&action_id, Some(action))
                        .with_reason(e.to_string()),
                );
                return Err(CorrelatorError::Transport(e));
            }
        }

        rx.await.unwrap_or(Err(CorrelatorError::Disposed))
    }

    /// Typed form of [`send`](Self::send).
    pub async fn request<A: Action>(
        &self,
        params: &A::Params,
        timeout_ms: TimeoutMs,
    ) -> Result<A::Output, CorrelatorError> {
        let raw = A::encode_params(params)?;
        let out = self.send(A::NAME, raw, timeout_ms).await?;
        Ok(A::decode_output(out)?)
    }

    /// Wait for the first inbound envelope of `kind` (and `action_id`, if given) satisfying `predicate`.
    ///
    /// Independent of pending requests: a matching envelope is still processed as a response.
    pub async fn wait_for<P>(
        &self,
        kind: EnvelopeKind,
        predicate: P,
        timeout_ms: TimeoutMs,
        action_id: Option<ActionId>,
    ) -> Reply
    where
        P: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut st = self.shared.lock();
            if st.disposed {
                return Err(CorrelatorError::Disposed);
            }
            let key = st.next_waiter;
            st.next_waiter += 1;

            let timer = self.spawn_timer(Expiry::Wait(key), timeout_ms);
            st.waiters.insert(
                key,
                Waiter {
                    kind,
                    action_id,
                    predicate: Box::new(predicate),
                    tx,
                    timer,
                },
            );
        }
        rx.await.unwrap_or(Err(CorrelatorError::Disposed))
    }

    /// Feed an envelope received from the target.
    pub fn handle_inbound(&self, envelope: &Envelope) {
        self.shared.notify_waiters(envelope);

        match envelope {
            Envelope::Status(m) => match m.payload.status {
                CommandStatus::Done => {
                    let result = m.payload.result.clone().unwrap_or(Value::Null);
                    self.shared.settle(&m.action_id, Ok(result));
                }
                CommandStatus::Error => {
                    let message = m
                        .payload
                        .error
                        .clone()
                        .unwrap_or_else(|| "handler failed".to_string());
                    self.shared.settle(
                        &m.action_id,
                        Err(CorrelatorError::Remote {
                            message,
                            details: m.payload.result.clone(),
                        }),
                    );
                }
                CommandStatus::InProgress | CommandStatus::Interrupted => {
                    trace!(
                        action_id = %m.action_id,
                        status = %m.payload.status,
                        paused = m.payload.paused,
                        "non-terminal status"
                    );
                }
            },
            Envelope::Error(m) => self.shared.settle(
                &m.action_id,
                Err(CorrelatorError::Remote {
                    message: m.payload.message.clone(),
                    details: m.payload.details.clone(),
                }),
            ),
            Envelope::Event(_) => {}
            Envelope::Command(m) => {
                warn!(action_id = %m.action_id, action = m.action(), "command envelope received by controller; ignored");
            }
        }
    }

    /// Reject every outstanding request and wait condition; later calls fail with `Disposed`.
    pub fn dispose(&self) {
        let (pending, waiters) = {
            let mut st = self.shared.lock();
            if st.disposed {
                return;
            }
            st.disposed = true;
            (mem::take(&mut st.pending), mem::take(&mut st.waiters))
        };

        info!(
            peer = %self.shared.target,
            pending = pending.len(),
            waiters = waiters.len(),
            "correlator disposed"
        );
        for (_, p) in pending {
            p.timer.abort();
            let _ = p.tx.send(Err(CorrelatorError::Disposed));
        }
        for (_, w) in waiters {
            w.timer.abort();
            let _ = w.tx.send(Err(CorrelatorError::Disposed));
        }
        self.shared
            .events
            .publish(Event::new(EventKind::CorrelatorDisposed));
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_pending(&self, action_id: &ActionId) -> bool {
        self.shared.lock().pending.contains_key(action_id)
    }

    pub fn waiter_count(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    fn register(
        &self,
        action_id: &ActionId,
        action: &str,
        timeout_ms: TimeoutMs,
    ) -> Result<oneshot::Receiver<Reply>, CorrelatorError> {
        let (tx, rx) = oneshot::channel();

        // The timer is spawned while the lock is held so it cannot observe the table before the insert.
        let mut st = self.shared.lock();
        if st.disposed {
            return Err(CorrelatorError::Disposed);
        }
        if st.pending.contains_key(action_id) {
            return Err(CorrelatorError::DuplicateActionId(action_id.clone()));
        }
        let timer = self.spawn_timer(Expiry::Request(action_id.clone()), timeout_ms);
        st.pending.insert(
            action_id.clone(),
            Pending {
                action: action.to_string(),
                tx,
                timer,
                sent_at: Instant::now(),
            },
        );
        Ok(rx)
    }

    fn spawn_timer(&self, expiry: Expiry, timeout_ms: TimeoutMs) -> AbortHandle {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(expiry, timeout_ms);
            }
        })
        .abort_handle()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pending(&self, id: &ActionId) -> Option<Pending> {
        self.lock().pending.remove(id)
    }

    fn settle(&self, id: &ActionId, reply: Reply) {
        let Some(p) = self.take_pending(id) else {
            trace!(action_id = %id, "late or unknown response ignored");
            self.events
                .publish(Event::new(EventKind::LateResponse).with_action(id, None));
            return;
        };
        p.timer.abort();

        let elapsed = p.sent_at.elapsed();
        let event = match &reply {
            Ok(_) => {
                debug!(action_id = %id, action = %p.action, ?elapsed, "request resolved");
                Event::new(EventKind::RequestResolved)
            }
            Err(e) => {
                debug!(action_id = %id, action = %p.action, reason = %e, "request rejected");
                Event::new(EventKind::RequestFailed).with_reason(e.to_string())
            }
        };
        self.events.publish(
            event
                .with_action(id, Some(&p.action))
                .with_elapsed(elapsed),
        );
        let _ = p.tx.send(reply);
    }

    fn notify_waiters(&self, envelope: &Envelope) {
        let kind = envelope.kind();
        let fired: Vec<Waiter> = {
            let mut st = self.lock();
            let keys: Vec<u64> = st
                .waiters
                .iter()
                .filter(|(_, w)| {
                    w.kind == kind
                        && w.action_id
                            .as_ref()
                            .is_none_or(|id| id == envelope.action_id())
                        && (w.predicate)(envelope)
                })
                .map(|(k, _)| *k)
                .collect();
            keys.into_iter()
                .filter_map(|k| st.waiters.remove(&k))
                .collect()
        };
        if fired.is_empty() {
            return;
        }

        let payload = envelope.payload_value();
        for w in fired {
            w.timer.abort();
            let _ = w.tx.send(Ok(payload.clone()));
        }
    }

    fn expire(&self, expiry: Expiry, timeout_ms: TimeoutMs) {
        match expiry {
            Expiry::Request(id) => {
                let Some(p) = self.take_pending(&id) else {
                    return;
                };
                warn!(action_id = %id, action = %p.action, timeout_ms, "request timed out");
                self.events.publish(
                    Event::new(EventKind::RequestTimedOut)
                        .with_action(&id, Some(&p.action))
                        .with_elapsed(p.sent_at.elapsed()),
                );
                let _ = p.tx.send(Err(CorrelatorError::Timeout {
                    what: format!("{} ({id})", p.action),
                    timeout_ms,
                }));
            }
            Expiry::Wait(key) => {
                let Some(w) = self.lock().waiters.remove(&key) else {
                    return;
                };
                debug!(kind = %w.kind, timeout_ms, "wait condition timed out");
                let mut event = Event::new(EventKind::WaitTimedOut);
                if let Some(id) = &w.action_id {
                    event = event.with_action(id, None);
                }
                self.events.publish(event);
                let _ = w.tx.send(Err(CorrelatorError::Timeout {
                    what: format!("{} envelope", w.kind),
                    timeout_ms,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::events::testing::Recorder;
    use crate::transport::{ChannelHub, Inbound};
    use pilot_model::{
        CommandEnvelope, ErrorPayload, Navigate, NavigateOutput, NavigateParams, StatusPayload,
    };

    struct Fixture {
        correlator: Correlator,
        tab_rx: mpsc::UnboundedReceiver<Inbound>,
        recorder: Arc<Recorder>,
        hub: ChannelHub,
    }

    fn fixture() -> Fixture {
        let hub = ChannelHub::new();
        let (ctl, _ctl_rx) = hub.connect(TargetRef::from("controller"));
        let (_tab, tab_rx) = hub.connect(TargetRef::from("tab"));
        let recorder = Arc::new(Recorder::default());

        let correlator = Correlator::builder(TargetRef::from("tab"), Arc::new(ctl))
            .with_events(EventBus::new(vec![recorder.clone()]))
            .build();

        Fixture {
            correlator,
            tab_rx,
            recorder,
            hub,
        }
    }

    async fn next_command(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> CommandEnvelope {
        match rx.recv().await.expect("mailbox open").envelope {
            Envelope::Command(c) => c,
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn done_status_resolves_and_clears_entry() {
        let mut f = fixture();
        let c = f.correlator.clone();
        let call = tokio::spawn(async move { c.send("click", json!({"selector": "#a"}), 5_000).await });

        let cmd = next_command(&mut f.tab_rx).await;
        assert_eq!(cmd.action(), "click");
        assert_eq!(cmd.payload.parameters["selector"], "#a");
        assert!(f.correlator.is_pending(&cmd.action_id));

        f.correlator.handle_inbound(&Envelope::status(
            cmd.action_id.clone(),
            StatusPayload::in_progress("click"),
        ));
        assert!(f.correlator.is_pending(&cmd.action_id));

        f.correlator.handle_inbound(&Envelope::status(
            cmd.action_id.clone(),
            StatusPayload::done("click", json!({"clicked": true})),
        ));

        let out = call.await.unwrap().unwrap();
        assert_eq!(out, json!({"clicked": true}));
        assert_eq!(f.correlator.pending_count(), 0);
        assert_eq!(f.recorder.count(EventKind::RequestResolved), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_status_keeps_request_pending() {
        let mut f = fixture();
        let c = f.correlator.clone();
        let call = tokio::spawn(async move { c.send("click", json!({}), 5_000).await });

        let cmd = next_command(&mut f.tab_rx).await;
        f.correlator.handle_inbound(&Envelope::status(
            cmd.action_id.clone(),
            StatusPayload::interrupted("click"),
        ));
        assert!(f.correlator.is_pending(&cmd.action_id));

        f.correlator.handle_inbound(&Envelope::status(
            cmd.action_id.clone(),
            StatusPayload::done("click", json!(null)).restored(),
        ));
        assert_eq!(call.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn error_status_rejects_with_payload() {
        let mut f = fixture();
        let c = f.correlator.clone();
        let call = tokio::spawn(async move { c.send("click", json!({}), 5_000).await });

        let cmd = next_command(&mut f.tab_rx).await;
        f.correlator.handle_inbound(&Envelope::status(
            cmd.action_id.clone(),
            StatusPayload::failed("click", "element not found"),
        ));

        let err = call.await.unwrap().unwrap_err();
        match err {
            CorrelatorError::Remote { message, .. } => assert_eq!(message, "element not found"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn error_envelope_rejects() {
        let mut f = fixture();
        let c = f.correlator.clone();
        let call = tokio::spawn(async move { c.send("frobnicate", json!({}), 5_000).await });

        let cmd = next_command(&mut f.tab_rx).await;
        f.correlator.handle_inbound(&Envelope::error(
            cmd.action_id.clone(),
            ErrorPayload::new("unknown action: frobnicate"),
        ));

        assert!(matches!(
            call.await.unwrap(),
            Err(CorrelatorError::Remote { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_and_late_response_is_ignored() {
        let mut f = fixture();
        let c = f.correlator.clone();
        let call = tokio::spawn(async move { c.send("foo", json!({}), 1_000).await });

        let cmd = next_command(&mut f.tab_rx).await;
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err:?}");
        assert!(!f.correlator.is_pending(&cmd.action_id));
        assert_eq!(f.recorder.count(EventKind::RequestTimedOut), 1);

        tokio::time::advance(Duration::from_millis(499)).await;
        f.correlator.handle_inbound(&Envelope::status(
            cmd.action_id.clone(),
            StatusPayload::done("foo", json!("late")),
        ));
        assert_eq!(f.correlator.pending_count(), 0);
        assert_eq!(f.recorder.count(EventKind::RequestResolved), 0);
        assert_eq!(f.recorder.count(EventKind::LateResponse), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_rejects_immediately() {
        let f = fixture();
        f.hub.disconnect(&TargetRef::from("tab"));

        let started = Instant::now();
        let err = f
            .correlator
            .send("click", json!({}), 60_000)
            .await
            .unwrap_err();

        assert!(matches!(err, CorrelatorError::Transport(_)));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(f.correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_coexists_with_pending_send() {
        let mut f = fixture();
        let id = ActionId::from("nav-1");

        let c = f.correlator.clone();
        let wait_id = id.clone();
        let waiter = tokio::spawn(async move {
            c.wait_for(
                EnvelopeKind::Event,
                |e| e.payload_value()["phase"] == "loaded",
                5_000,
                Some(wait_id),
            )
            .await
        });
        tokio::task::yield_now().await;

        let c = f.correlator.clone();
        let send_id = id.clone();
        let call = tokio::spawn(async move { c.send_as(send_id, "navigate", json!({}), 5_000).await });
        let _ = next_command(&mut f.tab_rx).await;

        // other action id and non-matching predicate are both skipped
        f.correlator
            .handle_inbound(&Envelope::event(ActionId::from("other"), json!({"phase": "loaded"})));
        f.correlator
            .handle_inbound(&Envelope::event(id.clone(), json!({"phase": "loading"})));
        assert_eq!(f.correlator.waiter_count(), 1);

        f.correlator
            .handle_inbound(&Envelope::event(id.clone(), json!({"phase": "loaded"})));
        assert_eq!(waiter.await.unwrap().unwrap(), json!({"phase": "loaded"}));
        assert!(f.correlator.is_pending(&id));

        f.correlator.handle_inbound(&Envelope::status(
            id.clone(),
            StatusPayload::done("navigate", json!({"location": "https://b"})),
        ));
        assert_eq!(call.await.unwrap().unwrap()["location"], "https://b");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out_and_is_removed() {
        let f = fixture();
        let c = f.correlator.clone();
        let waiter = tokio::spawn(async move {
            c.wait_for(EnvelopeKind::Status, |_| true, 200, None).await
        });
        tokio::task::yield_now().await;
        assert_eq!(f.correlator.waiter_count(), 1);

        tokio::time::advance(Duration::from_millis(201)).await;
        assert!(waiter.await.unwrap().unwrap_err().is_timeout());
        assert_eq!(f.correlator.waiter_count(), 0);
        assert_eq!(f.recorder.count(EventKind::WaitTimedOut), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_rejects_everything_outstanding() {
        let mut f = fixture();
        let c = f.correlator.clone();
        let call = tokio::spawn(async move { c.send("click", json!({}), 60_000).await });
        let c = f.correlator.clone();
        let waiter = tokio::spawn(async move {
            c.wait_for(EnvelopeKind::Event, |_| true, 60_000, None).await
        });

        let _ = next_command(&mut f.tab_rx).await;
        tokio::task::yield_now().await;
        f.correlator.dispose();

        assert!(matches!(call.await.unwrap(), Err(CorrelatorError::Disposed)));
        assert!(matches!(waiter.await.unwrap(), Err(CorrelatorError::Disposed)));
        assert_eq!(f.correlator.pending_count(), 0);
        assert_eq!(f.correlator.waiter_count(), 0);

        let err = f.correlator.send("click", json!({}), 1_000).await.unwrap_err();
        assert!(matches!(err, CorrelatorError::Disposed));
        assert!(f.correlator.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_action_id_is_refused() {
        let mut f = fixture();
        let c = f.correlator.clone();
        let _first = tokio::spawn(async move {
            c.send_as(ActionId::from("dup"), "click", json!({}), 60_000).await
        });
        let _ = next_command(&mut f.tab_rx).await;

        let err = f
            .correlator
            .send_as(ActionId::from("dup"), "click", json!({}), 60_000)
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelatorError::DuplicateActionId(_)));
        assert_eq!(f.correlator.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn typed_request_round_trip() {
        let mut f = fixture();
        let c = f.correlator.clone();
        let call = tokio::spawn(async move {
            c.request::<Navigate>(
                &NavigateParams {
                    url: "https://example.org".into(),
                },
                5_000,
            )
            .await
        });

        let cmd = next_command(&mut f.tab_rx).await;
        assert_eq!(cmd.action(), "navigate");
        assert_eq!(cmd.payload.parameters["url"], "https://example.org");

        f.correlator.handle_inbound(&Envelope::status(
            cmd.action_id,
            StatusPayload::done("navigate", json!({"location": "https://example.org/"})),
        ));
        let out = call.await.unwrap().unwrap();
        assert_eq!(
            out,
            NavigateOutput {
                location: Some("https://example.org/".into())
            }
        );
    }
}
