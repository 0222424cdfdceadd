//! Prometheus metrics for pilot scheduling and command traffic.
//!
//! [`PrometheusMetrics`] is a [`pilot_core::Subscribe`] implementation: register it on the
//! scheduler and correlator event buses and it keeps the counters below up to date.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use pilot_core::{EventBus, Scheduler, SchedulerConfig};
//! use pilot_prometheus::{Encoder, PrometheusMetrics};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let bus = EventBus::new(vec![Arc::new(metrics.clone())]);
//! let _scheduler = Scheduler::builder(SchedulerConfig::default())
//!     .with_events(bus)
//!     .build();
//!
//! // later, from whatever serves /metrics:
//! let families = metrics.gather();
//! let mut buf = Vec::new();
//! pilot_prometheus::TextEncoder::new().encode(&families, &mut buf)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `pilot_tasks_started_total{lane}` - Counter
//! - `pilot_tasks_completed_total{lane, outcome}` - Counter
//! - `pilot_task_duration_seconds{lane}` - Histogram
//! - `pilot_requests_total{outcome}` - Counter
//!
//! No HTTP endpoint is provided; serve [`PrometheusMetrics::gather`] from the application.

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
