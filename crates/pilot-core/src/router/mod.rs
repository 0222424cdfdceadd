use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{instrument, trace};

use pilot_model::{Action, TimeoutMs};

use crate::{correlator::Correlator, error::CoreError, scheduler::TaskExecutor};

/// Unit of work a scheduled task type resolves to.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn supports(&self, task_type: &str) -> bool;

    async fn run(&self, task_type: &str, input: Value) -> Result<Value, CoreError>;
}

/// [`TaskExecutor`] that routes a task type to the first registered operation supporting it.
///
/// A task type nothing supports fails locally with [`CoreError::NoOperation`]; no command is sent.
#[derive(Default)]
pub struct OperationRouter {
    operations: Vec<Arc<dyn Operation>>,
}

impl OperationRouter {
    #[inline]
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    #[inline]
    pub fn register(&mut self, op: Arc<dyn Operation>) {
        self.operations.push(op);
    }

    /// Register a [`CommandOperation`] forwarding `task_type` to the correlator's target.
    pub fn forward(&mut self, task_type: &'static str, correlator: Correlator, timeout_ms: TimeoutMs) {
        self.register(Arc::new(CommandOperation::new(task_type, correlator, timeout_ms)));
    }

    pub fn pick(&self, task_type: &str) -> Option<&Arc<dyn Operation>> {
        self.operations.iter().find(|op| op.supports(task_type))
    }
}

#[async_trait]
impl TaskExecutor for OperationRouter {
    #[instrument(level = "trace", skip(self, input))]
    async fn execute(&self, task_type: &str, input: Value) -> Result<Value, CoreError> {
        let op = self
            .pick(task_type)
            .ok_or_else(|| CoreError::NoOperation(task_type.to_string()))?;

        trace!(operation = op.name(), "operation picked");
        op.run(task_type, input).await
    }
}

/// Operation that sends the task input as the parameters of a single command.
pub struct CommandOperation {
    action: &'static str,
    correlator: Correlator,
    timeout_ms: TimeoutMs,
}

impl CommandOperation {
    pub fn new(action: &'static str, correlator: Correlator, timeout_ms: TimeoutMs) -> Self {
        Self {
            action,
            correlator,
            timeout_ms,
        }
    }

    /// Forward a typed action under its wire name.
    pub fn for_action<A: Action>(correlator: Correlator, timeout_ms: TimeoutMs) -> Self {
        Self::new(A::NAME, correlator, timeout_ms)
    }
}

#[async_trait]
impl Operation for CommandOperation {
    fn name(&self) -> &'static str {
        self.action
    }

    fn supports(&self, task_type: &str) -> bool {
        task_type == self.action
    }

    async fn run(&self, _task_type: &str, input: Value) -> Result<Value, CoreError> {
        let parameters = match input {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Ok(self
            .correlator
            .send(self.action, parameters, self.timeout_ms)
            .await?)
    }
}
