use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pilot_core::{
    ChannelHub, CommandOperation, Correlator, CorrelatorConfig, EventBus, OperationRouter,
    Registry, ScheduleOptions, Scheduler, SchedulerConfig, Subscribe, TargetRef, Transport,
};
use pilot_exec::MemoryStore;
use pilot_model::{Action, Lane, Navigate, NavigateParams, TaskQuery};
use pilot_observe::{Journal, LoggerConfig, logger_init};
use pilot_prometheus::{Encoder, PrometheusMetrics, TextEncoder};

mod tab;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    let level = std::env::var("PILOT_LOG").unwrap_or_else(|_| "info".to_string());
    logger_init(&LoggerConfig::default().with_level(level))?;
    info!("logger initialized");

    // 2) Event subscribers
    let metrics = PrometheusMetrics::new()?;
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Journal), Arc::new(metrics.clone())];
    let events = EventBus::new(subscribers);

    // 3) Target side
    let hub = ChannelHub::new();
    let token = CancellationToken::new();
    let tab_host = tokio::spawn(tab::host(
        hub.clone(),
        MemoryStore::new(),
        "https://shop.test/".to_string(),
        token.clone(),
    ));

    // 4) Controller side: one correlator per target, fed by the inbound pump
    let (transport, mut inbound) = hub.connect(TargetRef::from(tab::CONTROLLER));
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let correlators = Arc::new(Registry::new().with_teardown(|target: &TargetRef, c: &Correlator| {
        info!(peer = %target, "disposing correlator");
        c.dispose();
    }));
    let correlator = correlators.ensure(&TargetRef::from(tab::TAB), |target| {
        Correlator::builder(target.clone(), Arc::clone(&transport))
            .with_config(CorrelatorConfig { default_timeout_ms: 5_000 })
            .with_events(events.clone())
            .build()
    });

    let pump = tokio::spawn({
        let correlators = Arc::clone(&correlators);
        async move {
            while let Some(msg) = inbound.recv().await {
                match correlators.get(&msg.source) {
                    Some(c) => c.handle_inbound(&msg.envelope),
                    None => debug!(source = %msg.source, "envelope from unknown target dropped"),
                }
            }
        }
    });

    // 5) Router + scheduler
    let timeout_ms = correlator.default_timeout_ms();
    let mut router = OperationRouter::new();
    router.register(Arc::new(CommandOperation::for_action::<Navigate>(
        (*correlator).clone(),
        timeout_ms,
    )));
    router.forward("click", (*correlator).clone(), timeout_ms);
    router.forward("read-location", (*correlator).clone(), timeout_ms);

    let scheduler = Scheduler::builder(SchedulerConfig { tick_ms: 250 })
        .with_events(events.clone())
        .with_executor(Arc::new(router))
        .build();

    scheduler.schedule(
        ScheduleOptions::new("read-location")
            .with_lane(Lane::Parallel)
            .every_ms(2_000),
    );
    scheduler.schedule(
        ScheduleOptions::new(Navigate::NAME)
            .with_input(json!({ "url": "https://shop.test/cart" }))
            .after(Duration::from_millis(500)),
    );
    scheduler.schedule(
        ScheduleOptions::new("click")
            .with_input(json!({ "selector": "#checkout" }))
            .with_priority(10)
            .after(Duration::from_millis(1_500)),
    );
    // nothing handles this one; it fails without reaching the target
    scheduler.schedule(ScheduleOptions::new("scroll").after(Duration::from_secs(1)));

    let scheduler_loop = scheduler.spawn(token.clone());
    info!(tasks = scheduler.query(&TaskQuery::new()).total, "scheduler running");

    // 6) A direct typed request next to the scheduled traffic
    tokio::time::sleep(Duration::from_secs(3)).await;
    let params = NavigateParams {
        url: "https://shop.test/receipt".to_string(),
    };
    match correlator.request::<Navigate>(&params, timeout_ms).await {
        Ok(out) => info!(location = ?out.location, "direct navigation completed"),
        Err(e) => warn!(error = %e, "direct navigation failed"),
    }

    info!("press Ctrl+C to stop");
    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
    }
    info!("shutting down...");

    token.cancel();
    scheduler_loop.await?;
    tab_host.await?;
    correlators.invalidate_all();
    pump.abort();

    let mut buf = Vec::new();
    TextEncoder::new().encode(&metrics.gather(), &mut buf)?;
    println!("{}", String::from_utf8_lossy(&buf));
    Ok(())
}
