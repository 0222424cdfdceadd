//! Target-side command executor.
//!
//! Receives `command` envelopes, runs the registered handler and reports progress back to the
//! controller as `status` (or `error`) envelopes. Commands whose handler can tear down the
//! execution context are checkpointed first; [`Executor::resume_from_checkpoint`] decides what
//! to do with such a command once a fresh context comes up.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pilot_core::{Inbound, TargetRef, Transport};
use pilot_model::{
    ActionId, Checkpoint, CommandEnvelope, CommandStatus, Envelope, ErrorPayload, StatusPayload,
};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ExecutorConfig;
use crate::error::ExecResult;
use crate::handler::{
    ActionHandler, CommandHandler, HandlerContext, HandlerRegistry, LogBook, ReloadRisk,
    TargetContext,
};
use crate::store::CheckpointStore;


/// What [`Executor::resume_from_checkpoint`] did with the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumption {
    /// No usable checkpoint.
    Nothing,
    /// Pause state restored; a deferred command waits for [`Executor::set_paused`].
    Paused,
    /// A navigation completed by the teardown; `done` was reported without running the handler.
    Synthesized,
    /// The interrupted command was executed again.
    Reexecuted,
    /// The checkpointed action has no handler in this context.
    Discarded,
}

/// Command parked by the pause gate.
struct Parked {
    cmd: CommandEnvelope,
    /// It came out of a checkpoint.
    restored: bool,
}

#[derive(Default)]
struct State {
    current: Option<CommandEnvelope>,
    status: Option<CommandStatus>,
    paused: bool,
    parked: Option<Parked>,
    /// Reload-risky command whose handler is still running.
    guarded: Option<CommandEnvelope>,
    /// A checkpoint record is believed to exist in the store.
    persisted: bool,
}

impl State {
    /// Command the durable record must describe. A parked command wins over a running one.
    fn checkpointed(&self) -> Option<&CommandEnvelope> {
        self.parked.as_ref().map(|p| &p.cmd).or(self.guarded.as_ref())
    }

    /// Nothing left that has to survive a teardown.
    fn is_settled(&self) -> bool {
        !self.paused && self.checkpointed().is_none()
    }
}

pub struct ExecutorBuilder {
    transport: Arc<dyn Transport>,
    controller: TargetRef,
    store: Arc<dyn CheckpointStore>,
    context: Arc<dyn TargetContext>,
    config: ExecutorConfig,
    handlers: HandlerRegistry,
}

impl ExecutorBuilder {
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn build(self) -> Executor {
        Executor {
            logs: LogBook::new(self.config.max_logs),
            transport: self.transport,
            controller: self.controller,
            store: self.store,
            context: self.context,
            config: self.config,
            handlers: self.handlers,
            state: Mutex::new(State::default()),
        }
    }
}

pub struct Executor {
    transport: Arc<dyn Transport>,
    controller: TargetRef,
    store: Arc<dyn CheckpointStore>,
    context: Arc<dyn TargetContext>,
    config: ExecutorConfig,
    handlers: HandlerRegistry,
    logs: LogBook,
    state: Mutex<State>,
}

impl Executor {
    /// Start building an executor that reports to `controller` over `transport`.
    pub fn builder(
        transport: Arc<dyn Transport>,
        controller: TargetRef,
        store: Arc<dyn CheckpointStore>,
        context: Arc<dyn TargetContext>,
    ) -> ExecutorBuilder {
        ExecutorBuilder {
            transport,
            controller,
            store,
            context,
            config: ExecutorConfig::default(),
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn register(&self, action: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.handlers.register(action, handler);
    }

    pub fn register_action<A, H>(&self, handler: H)
    where
        A: pilot_model::Action,
        H: ActionHandler<A>,
    {
        self.handlers.register_action::<A, H>(handler);
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Most recent command still executing or parked by the pause gate.
    pub fn current(&self) -> Option<CommandEnvelope> {
        self.lock().current.clone()
    }

    /// Status of the most recent command, if any.
    pub fn status(&self) -> Option<CommandStatus> {
        self.lock().status
    }

    /// Handler log entries, oldest first.
    pub fn logs(&self) -> Vec<pilot_model::LogEntry> {
        self.logs.snapshot()
    }

    /// Handle one inbound envelope. Anything but a `command` is ignored.
    #[instrument(level = "debug", skip_all, fields(action_id = %envelope.action_id()))]
    pub async fn on_command(&self, envelope: Envelope) {
        let Envelope::Command(cmd) = envelope else {
            debug!(kind = %envelope.kind(), "non-command envelope ignored");
            return;
        };

        let action = cmd.action().to_string();
        let Some(handler) = self.handlers.get(&action) else {
            warn!(action, "no handler for action");
            let err = ErrorPayload::new(format!("unknown action: {action}"));
            self.emit(Envelope::error(cmd.action_id.clone(), err)).await;
            return;
        };

        let (paused, replaced) = {
            let mut st = self.lock();
            if st.paused {
                st.current = Some(cmd.clone());
                st.status = Some(CommandStatus::InProgress);
                let parked = Parked {
                    cmd: cmd.clone(),
                    restored: false,
                };
                (true, st.parked.replace(parked))
            } else {
                (false, None)
            }
        };

        if paused {
            info!(action, "executor paused; command deferred");
            self.sync_checkpoint();
            if let Some(old) = replaced {
                warn!(replaced = %old.cmd.action_id, "parked command superseded");
                let msg = format!("superseded by {} while paused", cmd.action_id);
                self.emit_status(&old.cmd, StatusPayload::failed(old.cmd.action(), msg))
                    .await;
            }
            self.emit_status(&cmd, StatusPayload::paused(&action)).await;
            return;
        }

        self.execute(cmd, handler, false).await;
    }

    /// Toggle the pause gate. Un-pausing runs a deferred command, if one is parked.
    pub async fn set_paused(&self, paused: bool) {
        let released = {
            let mut st = self.lock();
            if st.paused == paused {
                return;
            }
            st.paused = paused;
            if paused { None } else { st.parked.take() }
        };
        info!(paused, "executor pause state changed");

        // the record must stop claiming a pause before the released command runs
        self.sync_checkpoint();

        let Some(Parked { cmd, restored }) = released else {
            return;
        };
        match self.handlers.get(cmd.action()) {
            Some(handler) => self.execute(cmd, handler, restored).await,
            None => {
                warn!(action = cmd.action(), "deferred command lost its handler");
                self.finish(&cmd.action_id, None);
                let err = ErrorPayload::new(format!("unknown action: {}", cmd.action()));
                self.emit(Envelope::error(cmd.action_id.clone(), err)).await;
            }
        }
    }

    /// Consult the checkpoint left by a previous context, exactly once.
    ///
    /// The record is cleared as soon as it is read. Then:
    /// - paused: the pause flag and any deferred command are restored; the controller is told
    ///   the command is still parked.
    /// - a navigation in flight: the teardown proves it finished, `done` is reported with the
    ///   current location.
    /// - any other in-flight command: `interrupted` is reported and the handler runs again
    ///   with `restored` set.
    #[instrument(level = "debug", skip_all)]
    pub async fn resume_from_checkpoint(&self) -> Resumption {
        let key = self.config.checkpoint_key.as_str();
        let raw = match self.store.load(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Resumption::Nothing,
            Err(e) => {
                warn!(error = %e, "checkpoint unreadable");
                return Resumption::Nothing;
            }
        };
        if let Err(e) = self.store.clear(key) {
            warn!(error = %e, "failed to clear checkpoint");
        }

        let cp = match Checkpoint::decode(&raw) {
            Ok(cp) => cp,
            Err(e) => {
                warn!(error = %e, "discarding checkpoint");
                return Resumption::Nothing;
            }
        };
        self.logs.restore(cp.logs);

        if cp.paused {
            let parked = {
                let mut st = self.lock();
                st.paused = true;
                st.persisted = false;
                if let Some(cmd) = cp.current_command.clone() {
                    st.current = Some(cmd.clone());
                    st.status = Some(CommandStatus::InProgress);
                    st.parked = Some(Parked {
                        cmd,
                        restored: true,
                    });
                }
                st.parked.as_ref().map(|p| p.cmd.clone())
            };
            self.sync_checkpoint();
            info!(deferred = parked.is_some(), "pause state restored");
            if let Some(cmd) = parked {
                let status = StatusPayload::paused(cmd.action()).restored();
                self.emit_status(&cmd, status).await;
            }
            return Resumption::Paused;
        }

        let Some(cmd) = cp.current_command else {
            return Resumption::Nothing;
        };
        if cp.command_status.is_terminal() {
            trace!(status = %cp.command_status.as_str(), "checkpointed command already settled");
            return Resumption::Nothing;
        }

        let action = cmd.action().to_string();
        let Some(handler) = self.handlers.get(&action) else {
            warn!(action, "checkpointed action has no handler");
            let err = ErrorPayload::new(format!("unknown action: {action}"));
            self.emit(Envelope::error(cmd.action_id.clone(), err)).await;
            return Resumption::Discarded;
        };

        match handler.reload_risk() {
            ReloadRisk::Navigates => {
                let location = self.context.location();
                info!(action, ?location, "navigation completed across reload");
                {
                    let mut st = self.lock();
                    st.status = Some(CommandStatus::Done);
                }
                let status = StatusPayload::done(&action, json!({ "location": location }));
                self.emit_status(&cmd, status.restored()).await;
                Resumption::Synthesized
            }
            _ => {
                info!(action, "re-executing interrupted command");
                let status = StatusPayload::interrupted(&action).restored();
                self.emit_status(&cmd, status).await;
                self.execute(cmd, handler, true).await;
                Resumption::Reexecuted
            }
        }
    }

    /// Feed commands from `inbound` until it closes or `token` is cancelled.
    ///
    /// Each command runs on its own task so a long handler does not hold up the next one.
    /// Handlers still running when the loop stops are aborted, which is what a context
    /// teardown looks like from the executor's side.
    pub async fn serve(
        self: Arc<Self>,
        mut inbound: UnboundedReceiver<Inbound>,
        token: CancellationToken,
    ) {
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(res) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = res
                        && e.is_panic()
                    {
                        warn!("command handler panicked");
                    }
                }
                msg = inbound.recv() => {
                    let Some(msg) = msg else { break };
                    trace!(source = %msg.source, kind = %msg.envelope.kind(), "inbound");
                    let this = Arc::clone(&self);
                    running.spawn(async move { this.on_command(msg.envelope).await });
                }
            }
        }
        if !running.is_empty() {
            debug!(aborted = running.len(), "aborting in-flight commands");
        }
        running.abort_all();
        debug!("executor loop stopped");
    }

    async fn execute(&self, cmd: CommandEnvelope, handler: Arc<dyn CommandHandler>, restored: bool) {
        let action = cmd.action().to_string();
        let risk = handler.reload_risk();

        {
            let mut st = self.lock();
            st.current = Some(cmd.clone());
            st.status = Some(CommandStatus::InProgress);
            if risk.is_risky() {
                st.guarded = Some(cmd.clone());
            }
        }

        if risk.is_risky() {
            // must hit the store before the handler can tear the context down
            self.sync_checkpoint();
            if risk == ReloadRisk::Navigates {
                self.emit_status(&cmd, StatusPayload::in_progress(&action)).await;
            }
        }

        debug!(action, ?risk, restored, "executing command");
        let ctx = HandlerContext::new(
            cmd.action_id.clone(),
            restored,
            Arc::clone(&self.context),
            self.logs.clone(),
        );
        let status = match handler.handle(&ctx, cmd.payload.parameters.clone()).await {
            Ok(result) => StatusPayload::done(&action, result),
            Err(e) => {
                warn!(action, error = %e, "handler failed");
                StatusPayload::failed(&action, e.to_string())
            }
        };
        let status = if restored { status.restored() } else { status };

        self.finish(&cmd.action_id, Some(status.status));
        self.emit_status(&cmd, status).await;
    }

    /// Forget `action_id` and bring the stored checkpoint in line with what is still running.
    fn finish(&self, action_id: &ActionId, status: Option<CommandStatus>) {
        {
            let mut st = self.lock();
            if st.guarded.as_ref().is_some_and(|c| c.action_id == *action_id) {
                st.guarded = None;
            }
            if st.current.as_ref().is_some_and(|c| c.action_id == *action_id) {
                st.current = st.guarded.clone();
            }
            if status.is_some() {
                st.status = status;
            }
        }
        self.sync_checkpoint();
    }

    /// Write the checkpoint while something must survive a teardown, clear it otherwise.
    fn sync_checkpoint(&self) {
        let (settled, persisted) = {
            let st = self.lock();
            (st.is_settled(), st.persisted)
        };
        if !settled {
            self.persist();
        } else if persisted {
            self.clear_checkpoint();
        }
    }

    fn persist(&self) {
        let cp = {
            let st = self.lock();
            let command = st.checkpointed().cloned();
            let status = if command.is_some() {
                CommandStatus::InProgress
            } else {
                st.status.unwrap_or(CommandStatus::InProgress)
            };
            Checkpoint::new(command, status, st.paused, self.logs.snapshot())
        };
        match self.write_checkpoint(&cp) {
            Ok(()) => self.lock().persisted = true,
            Err(e) => warn!(error = %e, "failed to write checkpoint"),
        }
    }

    fn write_checkpoint(&self, cp: &Checkpoint) -> ExecResult<()> {
        let raw = cp.encode()?;
        self.store.save(&self.config.checkpoint_key, &raw)?;
        trace!(paused = cp.paused, command = cp.current_command.is_some(), "checkpoint saved");
        Ok(())
    }

    fn clear_checkpoint(&self) {
        match self.store.clear(&self.config.checkpoint_key) {
            Ok(()) => self.lock().persisted = false,
            Err(e) => warn!(error = %e, "failed to clear checkpoint"),
        }
    }

    async fn emit_status(&self, cmd: &CommandEnvelope, payload: StatusPayload) {
        let mut env = Envelope::status(cmd.action_id.clone(), payload);
        if let Some(cid) = &cmd.correlation_id {
            env = env.with_correlation(cid.clone());
        }
        self.emit(env).await;
    }

    async fn emit(&self, envelope: Envelope) {
        let kind = envelope.kind();
        if let Err(e) = self.transport.transmit(&self.controller, envelope).await {
            warn!(%kind, error = %e, "failed to report to controller");
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
