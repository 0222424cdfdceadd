//! Command handlers and their registry.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock, PoisonError};

use async_trait::async_trait;
use pilot_model::Action;
use serde_json::Value;
use tracing::trace;

use crate::error::HandlerError;

mod context;
pub(crate) use context::LogBook;
pub use context::{HandlerContext, StaticLocation, TargetContext};

/// Whether running a handler can tear down the execution context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReloadRisk {
    /// Completes within the current context.
    #[default]
    None,
    /// May trigger a reload as a side effect (e.g. clicking a link or submit button).
    /// After a teardown the command is executed again.
    MayReload,
    /// Always destroys the current context; arriving in the next one means it succeeded.
    /// After a teardown completion is reported without running the handler again.
    Navigates,
}

impl ReloadRisk {
    /// Returns `true` if a checkpoint must be written before the handler runs.
    pub fn is_risky(&self) -> bool {
        !matches!(self, ReloadRisk::None)
    }
}

/// Untyped handler working on raw JSON parameters.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    fn reload_risk(&self) -> ReloadRisk {
        ReloadRisk::None
    }

    async fn handle(&self, ctx: &HandlerContext, parameters: Value) -> Result<Value, HandlerError>;
}

/// Handler bound to a typed [`Action`].
#[async_trait]
pub trait ActionHandler<A: Action>: Send + Sync + 'static {
    fn reload_risk(&self) -> ReloadRisk {
        ReloadRisk::None
    }

    async fn handle(&self, ctx: &HandlerContext, params: A::Params) -> Result<A::Output, HandlerError>;
}

struct Typed<A, H> {
    handler: H,
    _action: PhantomData<fn() -> A>,
}

#[async_trait]
impl<A, H> CommandHandler for Typed<A, H>
where
    A: Action,
    H: ActionHandler<A>,
{
    fn reload_risk(&self) -> ReloadRisk {
        self.handler.reload_risk()
    }

    async fn handle(&self, ctx: &HandlerContext, parameters: Value) -> Result<Value, HandlerError> {
        let params =
            A::decode_params(parameters).map_err(|e| HandlerError::InvalidParams(e.to_string()))?;
        let output = self.handler.handle(ctx, params).await?;
        A::encode_output(&output).map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

/// Action name → handler lookup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn CommandHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `action`.
    pub fn register(&self, action: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let action = action.into();
        trace!(action, risk = ?handler.reload_risk(), "handler registered");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action, handler);
    }

    pub fn register_action<A, H>(&self, handler: H)
    where
        A: Action,
        H: ActionHandler<A>,
    {
        self.register(
            A::NAME,
            Arc::new(Typed::<A, H> {
                handler,
                _action: PhantomData,
            }),
        );
    }

    pub fn unregister(&self, action: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(action)
            .is_some()
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(action)
            .cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(action)
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
