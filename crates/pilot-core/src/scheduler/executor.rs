use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;

/// Callback the scheduler invokes for every due task.
///
/// Errors are recorded on the task and logged; they never stop the tick loop.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    async fn execute(&self, task_type: &str, input: Value) -> Result<Value, CoreError>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CoreError>> + Send + 'static,
{
    async fn execute(&self, task_type: &str, input: Value) -> Result<Value, CoreError> {
        (self.0)(task_type.to_string(), input).await
    }
}

/// Adapt an async closure into a [`TaskExecutor`].
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn TaskExecutor>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CoreError>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}
