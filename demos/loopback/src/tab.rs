use std::sync::Arc;

use async_trait::async_trait;
use pilot_core::{ChannelHub, TargetRef};
use pilot_exec::{
    ActionHandler, CommandHandler, Executor, HandlerContext, HandlerError, MemoryStore, ReloadRisk,
    StaticLocation,
};
use pilot_model::{LogLevel, Navigate, NavigateOutput, NavigateParams};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const CONTROLLER: &str = "controller";
pub const TAB: &str = "tab";

/// Asks the host to replace the current context; never returns in the context that ran it.
struct Goto {
    reload: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl ActionHandler<Navigate> for Goto {
    fn reload_risk(&self) -> ReloadRisk {
        ReloadRisk::Navigates
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        params: NavigateParams,
    ) -> Result<NavigateOutput, HandlerError> {
        ctx.log(LogLevel::Info, format!("navigating to {}", params.url));
        self.reload
            .send(params.url)
            .map_err(|_| HandlerError::failed("tab is closing"))?;
        std::future::pending().await
    }
}

struct Click;

#[async_trait]
impl CommandHandler for Click {
    fn reload_risk(&self) -> ReloadRisk {
        ReloadRisk::MayReload
    }

    async fn handle(&self, ctx: &HandlerContext, parameters: Value) -> Result<Value, HandlerError> {
        let selector = parameters
            .get("selector")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::InvalidParams("missing selector".into()))?;
        Ok(json!({ "clicked": selector, "restored": ctx.restored() }))
    }
}

struct ReadLocation;

#[async_trait]
impl CommandHandler for ReadLocation {
    async fn handle(&self, ctx: &HandlerContext, _parameters: Value) -> Result<Value, HandlerError> {
        Ok(json!({ "location": ctx.target().location() }))
    }
}

/// Simulated browser tab: one executor per page load, all sharing one durable store.
pub async fn host(hub: ChannelHub, store: MemoryStore, mut url: String, token: CancellationToken) {
    let (reload_tx, mut reload_rx) = mpsc::unbounded_channel();

    loop {
        let (transport, inbound) = hub.connect(TargetRef::from(TAB));
        let exec = Arc::new(
            Executor::builder(
                Arc::new(transport),
                TargetRef::from(CONTROLLER),
                Arc::new(store.clone()),
                Arc::new(StaticLocation::new(url.clone())),
            )
            .build(),
        );
        exec.register_action::<Navigate, _>(Goto {
            reload: reload_tx.clone(),
        });
        exec.register("click", Arc::new(Click));
        exec.register("read-location", Arc::new(ReadLocation));

        let resumed = exec.resume_from_checkpoint().await;
        info!(%url, ?resumed, "page loaded");

        let page = token.child_token();
        let serving = tokio::spawn(Arc::clone(&exec).serve(inbound, page.clone()));

        let next = tokio::select! {
            _ = token.cancelled() => None,
            next = reload_rx.recv() => next,
        };
        page.cancel();
        if let Err(e) = serving.await {
            warn!(error = %e, "page loop ended abnormally");
        }

        match next {
            Some(next) => {
                info!(from = %url, to = %next, "page unloading");
                url = next;
            }
            None => break,
        }
    }
    info!("tab closed");
}
