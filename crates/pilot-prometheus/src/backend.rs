use pilot_core::{Event, EventKind, Subscribe};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, proto::MetricFamily};

/// Event subscriber backed by its own [`Registry`].
///
/// Clones share the registry and collectors.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    tasks_started: IntCounterVec,
    tasks_completed: IntCounterVec,
    task_duration: HistogramVec,
    requests: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register the collectors on an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let tasks_started = IntCounterVec::new(
            Opts::new("pilot_tasks_started_total", "Task runs started by the scheduler"),
            &["lane"],
        )?;
        let tasks_completed = IntCounterVec::new(
            Opts::new("pilot_tasks_completed_total", "Task runs finished, by outcome"),
            &["lane", "outcome"],
        )?;
        let task_duration = HistogramVec::new(
            HistogramOpts::new("pilot_task_duration_seconds", "Wall time of a task run")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["lane"],
        )?;
        let requests = IntCounterVec::new(
            Opts::new("pilot_requests_total", "Correlated commands, by how they settled"),
            &["outcome"],
        )?;

        registry.register(Box::new(tasks_started.clone()))?;
        registry.register(Box::new(tasks_completed.clone()))?;
        registry.register(Box::new(task_duration.clone()))?;
        registry.register(Box::new(requests.clone()))?;

        Ok(Self {
            registry,
            tasks_started,
            tasks_completed,
            task_duration,
            requests,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    fn task_finished(&self, event: &Event, outcome: &str) {
        let lane = event.lane.map(|l| l.as_str()).unwrap_or("unknown");
        self.tasks_completed
            .with_label_values(&[lane, outcome])
            .inc();
        if let Some(elapsed) = event.elapsed {
            self.task_duration
                .with_label_values(&[lane])
                .observe(elapsed.as_secs_f64());
        }
    }
}

impl Subscribe for PrometheusMetrics {
    fn on_event(&self, event: &Event) {
        match event.kind {
            EventKind::TaskStarting => {
                let lane = event.lane.map(|l| l.as_str()).unwrap_or("unknown");
                self.tasks_started.with_label_values(&[lane]).inc();
            }
            EventKind::TaskSucceeded => self.task_finished(event, "success"),
            EventKind::TaskFailed => self.task_finished(event, "failure"),
            EventKind::RequestResolved => self.requests.with_label_values(&["done"]).inc(),
            EventKind::RequestFailed => self.requests.with_label_values(&["error"]).inc(),
            EventKind::RequestTimedOut => self.requests.with_label_values(&["timeout"]).inc(),
            EventKind::LateResponse => self.requests.with_label_values(&["late"]).inc(),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pilot_model::{ActionId, Lane, TaskId};

    use prometheus::{Encoder, TextEncoder};

    use super::*;

    /// Value of the sample line `name{labels}` in the text exposition, 0 if absent.
    fn counter(m: &PrometheusMetrics, name: &str, labels: &[(&str, &str)]) -> u64 {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&m.gather(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let wanted: Vec<String> = labels.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
        text.lines()
            .filter(|line| line.starts_with(&format!("{name}{{")))
            .filter(|line| wanted.iter().all(|w| line.contains(w.as_str())))
            .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
            .map(|v| v as u64)
            .sum()
    }

    #[test]
    fn counts_task_lifecycle_per_lane() {
        let m = PrometheusMetrics::new().unwrap();
        let started = Event::new(EventKind::TaskStarting).with_task(TaskId::new(1), "sync", Lane::Exclusive);
        m.on_event(&started);
        m.on_event(&started);
        m.on_event(
            &Event::new(EventKind::TaskFailed)
                .with_task(TaskId::new(1), "sync", Lane::Exclusive)
                .with_elapsed(Duration::from_millis(20)),
        );

        assert_eq!(counter(&m, "pilot_tasks_started_total", &[("lane", "exclusive")]), 2);
        assert_eq!(
            counter(
                &m,
                "pilot_tasks_completed_total",
                &[("lane", "exclusive"), ("outcome", "failure")]
            ),
            1
        );
        assert_eq!(counter(&m, "pilot_tasks_started_total", &[("lane", "parallel")]), 0);
    }

    #[test]
    fn counts_request_outcomes() {
        let m = PrometheusMetrics::new().unwrap();
        let id = ActionId::from("a-1");
        m.on_event(&Event::new(EventKind::RequestResolved).with_action(&id, Some("click")));
        m.on_event(&Event::new(EventKind::RequestTimedOut).with_action(&id, Some("click")));
        m.on_event(&Event::new(EventKind::LateResponse).with_action(&id, None));

        assert_eq!(counter(&m, "pilot_requests_total", &[("outcome", "done")]), 1);
        assert_eq!(counter(&m, "pilot_requests_total", &[("outcome", "timeout")]), 1);
        assert_eq!(counter(&m, "pilot_requests_total", &[("outcome", "late")]), 1);
    }

    #[test]
    fn shared_registry_rejects_duplicates() {
        let registry = Registry::new();
        assert!(PrometheusMetrics::with_registry(registry.clone()).is_ok());
        assert!(PrometheusMetrics::with_registry(registry).is_err());
    }
}
