//! Tick-driven task scheduler with an exclusive and a parallel lane.
//!
//! Each tick sorts both lanes by `(next_run_at asc, priority desc)` and then
//! - starts the first due exclusive task, unless one is already running;
//! - starts every due parallel task that is not already running.
//!
//! A finished run (successful, failed or panicked) clears the running flag, records `last_run_at`
//! and either moves `next_run_at` forward by the interval or retires the task.

mod executor;
pub use executor::{TaskExecutor, executor_fn};

mod task;
pub use task::{RunOutcome, ScheduleOptions, TaskInfo};

use std::{
    cmp::Ordering as CmpOrdering,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use pilot_model::{Lane, TaskId, TaskPage, TaskQuery};

use crate::{
    config::SchedulerConfig,
    events::{Event, EventBus, EventKind},
};
use task::Task;

#[derive(Default)]
struct State {
    exclusive: Vec<Task>,
    parallel: Vec<Task>,
    exclusive_running: Option<TaskId>,
    paused: bool,
}

impl State {
    fn queue_mut(&mut self, lane: Lane) -> &mut Vec<Task> {
        match lane {
            Lane::Exclusive => &mut self.exclusive,
            Lane::Parallel => &mut self.parallel,
        }
    }

    fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.exclusive.iter().chain(self.parallel.iter())
    }
}

/// Due-time first, then higher priority; `sort_by` is stable so insertion order breaks the remaining ties.
fn dispatch_order(a: &Task, b: &Task) -> CmpOrdering {
    a.next_run_at
        .cmp(&b.next_run_at)
        .then_with(|| b.priority.cmp(&a.priority))
}

struct Dispatch {
    id: TaskId,
    task_type: String,
    input: Value,
    lane: Lane,
}

struct Shared {
    config: SchedulerConfig,
    events: EventBus,
    executor: RwLock<Option<Arc<dyn TaskExecutor>>>,
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        self.executor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn complete(&self, d: &Dispatch, outcome: RunOutcome, elapsed: Duration) {
        let now = Instant::now();
        let mut events = Vec::with_capacity(2);

        {
            let mut st = self.lock();
            if d.lane == Lane::Exclusive && st.exclusive_running == Some(d.id) {
                st.exclusive_running = None;
            }

            let queue = st.queue_mut(d.lane);
            match queue.iter().position(|t| t.id == d.id) {
                Some(pos) => {
                    let task = &mut queue[pos];
                    task.running = false;
                    task.last_run_at = Some(now);
                    task.runs += 1;
                    task.last_outcome = Some(outcome.clone());

                    let interval = task.interval;
                    match interval {
                        Some(interval) => {
                            task.next_run_at = now + interval;
                            events.push(Event::new(EventKind::TaskRescheduled));
                        }
                        None => {
                            queue.remove(pos);
                            events.push(Event::new(EventKind::TaskRetired));
                        }
                    }
                }
                None => debug!(task = %d.id, "task canceled while running; not rescheduled"),
            }
        }

        let finished = match &outcome {
            RunOutcome::Succeeded => {
                debug!(task = %d.id, task_type = %d.task_type, lane = %d.lane, ?elapsed, "task run succeeded");
                Event::new(EventKind::TaskSucceeded)
            }
            RunOutcome::Failed(reason) => {
                warn!(task = %d.id, task_type = %d.task_type, lane = %d.lane, %reason, "task run failed");
                Event::new(EventKind::TaskFailed).with_reason(reason.clone())
            }
        };
        self.events.publish(
            finished
                .with_task(d.id, &d.task_type, d.lane)
                .with_elapsed(elapsed),
        );
        for e in events {
            self.events.publish(e.with_task(d.id, &d.task_type, d.lane));
        }
    }
}

/// Controller-side scheduler.
///
/// Cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

pub struct SchedulerBuilder {
    config: SchedulerConfig,
    events: EventBus,
    executor: Option<Arc<dyn TaskExecutor>>,
}

impl SchedulerBuilder {
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            shared: Arc::new(Shared {
                config: self.config,
                events: self.events,
                executor: RwLock::new(self.executor),
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            events: EventBus::default(),
            executor: None,
        }
    }

    /// Install (or replace) the callback invoked for due tasks.
    ///
    /// Runs already in flight keep the executor they were started with.
    pub fn set_executor(&self, executor: Arc<dyn TaskExecutor>) {
        *self
            .shared
            .executor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(executor);
    }

    /// Queue a task and return its id.
    pub fn schedule(&self, opts: ScheduleOptions) -> TaskId {
        let id = TaskId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let task = Task::new(id, opts, Instant::now());
        let (task_type, lane) = (task.task_type.clone(), task.lane);

        debug!(task = %id, %task_type, %lane, priority = task.priority, interval = ?task.interval, "task scheduled");
        self.shared.lock().queue_mut(lane).push(task);

        self.shared
            .events
            .publish(Event::new(EventKind::TaskScheduled).with_task(id, &task_type, lane));
        id
    }

    /// Remove a task. A run already in flight finishes but the task is not rescheduled.
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = {
            let mut st = self.shared.lock();
            let mut removed = None;
            for lane in [Lane::Exclusive, Lane::Parallel] {
                let queue = st.queue_mut(lane);
                if let Some(pos) = queue.iter().position(|t| t.id == id) {
                    removed = Some(queue.remove(pos));
                    break;
                }
            }
            removed
        };

        match removed {
            Some(task) => {
                debug!(task = %id, running = task.running, "task canceled");
                self.shared.events.publish(
                    Event::new(EventKind::TaskCanceled).with_task(id, &task.task_type, task.lane),
                );
                true
            }
            None => false,
        }
    }

    /// Remove every task matching `predicate`; returns how many were removed.
    pub fn cancel_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&TaskInfo) -> bool,
    {
        let removed: Vec<Task> = {
            let mut st = self.shared.lock();
            let mut removed = Vec::new();
            for lane in [Lane::Exclusive, Lane::Parallel] {
                let queue = st.queue_mut(lane);
                let (gone, kept): (Vec<Task>, Vec<Task>) =
                    queue.drain(..).partition(|t| predicate(&t.info()));
                *queue = kept;
                removed.extend(gone);
            }
            removed
        };

        for task in &removed {
            self.shared.events.publish(
                Event::new(EventKind::TaskCanceled).with_task(task.id, &task.task_type, task.lane),
            );
        }
        debug!(count = removed.len(), "tasks canceled by predicate");
        removed.len()
    }

    /// Stop dispatching. Runs already in flight are not interrupted.
    pub fn pause(&self) {
        let changed = !std::mem::replace(&mut self.shared.lock().paused, true);
        if changed {
            info!("scheduler paused");
            self.shared
                .events
                .publish(Event::new(EventKind::SchedulerPaused));
        }
    }

    pub fn resume(&self) {
        let changed = std::mem::replace(&mut self.shared.lock().paused, false);
        if changed {
            info!("scheduler resumed");
            self.shared
                .events
                .publish(Event::new(EventKind::SchedulerResumed));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub fn get(&self, id: TaskId) -> Option<TaskInfo> {
        self.shared
            .lock()
            .tasks()
            .find(|t| t.id == id)
            .map(Task::info)
    }

    /// All tasks, exclusive lane first, each lane in dispatch order.
    pub fn list(&self) -> Vec<TaskInfo> {
        let st = self.shared.lock();
        let mut exclusive: Vec<&Task> = st.exclusive.iter().collect();
        let mut parallel: Vec<&Task> = st.parallel.iter().collect();
        exclusive.sort_by(|a, b| dispatch_order(a, b));
        parallel.sort_by(|a, b| dispatch_order(a, b));

        exclusive
            .into_iter()
            .chain(parallel)
            .map(Task::info)
            .collect()
    }

    /// Query tasks with combined filters and pagination.
    ///
    /// `total` reflects the count after filtering, before pagination.
    pub fn query(&self, q: &TaskQuery) -> TaskPage<TaskInfo> {
        let filtered: Vec<TaskInfo> = self
            .list()
            .into_iter()
            .filter(|t| q.lane.is_none_or(|lane| t.lane == lane))
            .filter(|t| q.kind.as_deref().is_none_or(|k| t.task_type == k))
            .filter(|t| q.running.is_none_or(|r| t.running == r))
            .collect();
        let total = filtered.len();

        let items = filtered.into_iter().skip(q.offset).take(q.limit).collect();
        TaskPage { items, total }
    }

    /// Run one dispatch pass and return the ids of the tasks it started.
    ///
    /// Never fails: executor errors surface later, when the spawned run completes.
    pub fn tick(&self) -> Vec<TaskId> {
        let now = Instant::now();
        let executor = self.shared.executor();
        let mut dispatches = Vec::new();

        {
            let mut guard = self.shared.lock();
            if guard.paused {
                trace!("tick skipped; scheduler paused");
                return Vec::new();
            }
            let State {
                exclusive,
                parallel,
                exclusive_running,
                ..
            } = &mut *guard;

            exclusive.sort_by(dispatch_order);
            parallel.sort_by(dispatch_order);

            let any_due = (exclusive_running.is_none() && exclusive.iter().any(|t| t.is_due(now)))
                || parallel.iter().any(|t| t.is_due(now));
            if !any_due {
                return Vec::new();
            }
            if executor.is_none() {
                debug!("due tasks waiting; no executor installed");
                return Vec::new();
            }

            if exclusive_running.is_none()
                && let Some(task) = exclusive.iter_mut().find(|t| t.is_due(now))
            {
                task.running = true;
                *exclusive_running = Some(task.id);
                dispatches.push(Dispatch {
                    id: task.id,
                    task_type: task.task_type.clone(),
                    input: task.input.clone(),
                    lane: Lane::Exclusive,
                });
            }

            for task in parallel.iter_mut().filter(|t| t.is_due(now)) {
                task.running = true;
                dispatches.push(Dispatch {
                    id: task.id,
                    task_type: task.task_type.clone(),
                    input: task.input.clone(),
                    lane: Lane::Parallel,
                });
            }
        }

        let Some(executor) = executor else {
            return Vec::new();
        };
        dispatches
            .into_iter()
            .map(|d| {
                let id = d.id;
                self.spawn_run(Arc::clone(&executor), d);
                id
            })
            .collect()
    }

    /// Drive [`tick`](Self::tick) at the configured period until `token` is cancelled.
    #[instrument(level = "info", skip_all, fields(tick_ms = self.shared.config.tick_ms))]
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.shared.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("scheduler loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
        info!("scheduler loop stopped");
    }

    /// Spawn [`run`](Self::run) onto the current runtime.
    pub fn spawn(&self, token: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(token).await })
    }

    fn spawn_run(&self, executor: Arc<dyn TaskExecutor>, d: Dispatch) {
        info!(task = %d.id, task_type = %d.task_type, lane = %d.lane, "task is starting");
        self.shared
            .events
            .publish(Event::new(EventKind::TaskStarting).with_task(d.id, &d.task_type, d.lane));

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let started = Instant::now();
            let task_type = d.task_type.clone();
            let input = d.input.clone();

            // The run gets its own task so a panicking executor is observed as a JoinError.
            let run = tokio::spawn(async move { executor.execute(&task_type, input).await });
            let outcome = match run.await {
                Ok(Ok(_)) => RunOutcome::Succeeded,
                Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
                Err(e) if e.is_panic() => RunOutcome::Failed("executor panicked".to_string()),
                Err(e) => RunOutcome::Failed(e.to_string()),
            };
            shared.complete(&d, outcome, started.elapsed());
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::error::CoreError;
    use crate::events::testing::Recorder;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    /// Executor whose runs block until the test hands out permits.
    struct Gate {
        permits: Arc<Semaphore>,
        started: Mutex<Vec<String>>,
    }

    impl Gate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                permits: Arc::new(Semaphore::new(0)),
                started: Mutex::new(Vec::new()),
            })
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }

        fn release(&self, n: usize) {
            self.permits.add_permits(n);
        }
    }

    #[async_trait::async_trait]
    impl TaskExecutor for Gate {
        async fn execute(&self, task_type: &str, _input: Value) -> Result<Value, CoreError> {
            self.started.lock().unwrap().push(task_type.to_string());
            self.permits.acquire().await.unwrap().forget();
            Ok(Value::Null)
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::builder(SchedulerConfig::default()).build()
    }

    #[tokio::test(start_paused = true)]
    async fn exclusive_tasks_never_overlap() {
        let sched = scheduler();
        let gate = Gate::new();
        sched.set_executor(gate.clone());

        let a = sched.schedule(ScheduleOptions::new("a"));
        let b = sched.schedule(ScheduleOptions::new("b"));

        assert_eq!(sched.tick(), vec![a]);
        settle().await;
        assert_eq!(sched.tick(), Vec::<TaskId>::new());
        assert_eq!(gate.started(), vec!["a"]);
        assert!(sched.get(a).unwrap().running);
        assert!(!sched.get(b).unwrap().running);

        gate.release(1);
        settle().await;
        assert!(sched.get(a).is_none(), "one-shot task is retired after its run");

        assert_eq!(sched.tick(), vec![b]);
        settle().await;
        assert_eq!(gate.started(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_tasks_start_in_the_same_tick() {
        let sched = scheduler();
        let gate = Gate::new();
        sched.set_executor(gate.clone());

        let at = Instant::now() + Duration::from_secs(5);
        let a = sched.schedule(ScheduleOptions::new("a").with_lane(Lane::Parallel).run_at(at));
        let b = sched.schedule(ScheduleOptions::new("b").with_lane(Lane::Parallel).run_at(at));

        assert!(sched.tick().is_empty());
        tokio::time::advance(Duration::from_secs(5)).await;

        let started = sched.tick();
        assert_eq!(started, vec![a, b]);
        settle().await;
        assert_eq!(gate.started(), vec!["a", "b"]);
        assert!(sched.get(a).unwrap().running && sched.get(b).unwrap().running);

        // still running: neither may start a second overlapping run
        assert!(sched.tick().is_empty());
        gate.release(2);
        settle().await;
        assert!(sched.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn priority_breaks_ties_then_queue_order() {
        let sched = scheduler();
        let gate = Gate::new();
        sched.set_executor(gate.clone());

        let at = Instant::now();
        sched.schedule(ScheduleOptions::new("low").run_at(at));
        sched.schedule(ScheduleOptions::new("high-1").with_priority(5).run_at(at));
        sched.schedule(ScheduleOptions::new("high-2").with_priority(5).run_at(at));
        sched.schedule(ScheduleOptions::new("earlier").run_at(at - Duration::from_millis(1)));

        let order: Vec<String> = sched.list().into_iter().map(|t| t.task_type).collect();
        assert_eq!(order, vec!["earlier", "high-1", "high-2", "low"]);

        for _ in 0..4 {
            sched.tick();
            settle().await;
            gate.release(1);
            settle().await;
        }
        assert_eq!(gate.started(), vec!["earlier", "high-1", "high-2", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_task_advances_by_interval() {
        let sched = Scheduler::builder(SchedulerConfig { tick_ms: 1_000 }).build();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        sched.set_executor(executor_fn(move |_, _| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CoreError>(Value::Null)
            }
        }));

        let t0 = Instant::now();
        let first_due = t0 + Duration::from_secs(60);
        let id = sched.schedule(ScheduleOptions::new("sync").run_at(first_due).every_ms(60_000));

        let token = CancellationToken::new();
        let handle = sched.spawn(token.clone());
        tokio::time::sleep(Duration::from_millis(60_500)).await;

        let info = sched.get(id).expect("recurring task stays queued");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(info.runs, 1);
        let last = info.last_run_at.expect("ran once");
        assert_eq!(info.next_run_at, last + Duration::from_millis(60_000));
        assert!(last >= first_due && last < first_due + Duration::from_secs(1));
        assert_eq!(info.last_outcome, Some(RunOutcome::Succeeded));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_follow_the_normal_lifecycle() {
        let recorder = Arc::new(Recorder::default());
        let sched = Scheduler::builder(SchedulerConfig::default())
            .with_events(EventBus::new(vec![recorder.clone()]))
            .with_executor(executor_fn(|task_type, _| async move {
                match task_type.as_str() {
                    "boom" => panic!("executor bug"),
                    _ => Err::<Value, _>(CoreError::Operation("nope".into())),
                }
            }))
            .build();

        let recurring = sched.schedule(
            ScheduleOptions::new("flaky")
                .with_lane(Lane::Parallel)
                .every_ms(5_000),
        );
        let one_shot = sched.schedule(ScheduleOptions::new("flaky").with_lane(Lane::Parallel));
        let panicky = sched.schedule(ScheduleOptions::new("boom"));

        assert_eq!(sched.tick().len(), 3);
        settle().await;

        let info = sched.get(recurring).unwrap();
        assert!(!info.running);
        assert_eq!(info.next_run_at, info.last_run_at.unwrap() + Duration::from_secs(5));
        assert!(matches!(info.last_outcome, Some(RunOutcome::Failed(ref r)) if r.contains("nope")));
        assert!(sched.get(one_shot).is_none());
        assert!(sched.get(panicky).is_none());
        assert_eq!(recorder.count(EventKind::TaskFailed), 3);

        // the exclusive lane was released despite the panic
        let next = sched.schedule(ScheduleOptions::new("boom"));
        assert_eq!(sched.tick(), vec![next]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_gates_dispatch() {
        let sched = scheduler();
        let gate = Gate::new();
        sched.set_executor(gate.clone());
        let id = sched.schedule(ScheduleOptions::new("a").with_lane(Lane::Parallel));

        sched.pause();
        assert!(sched.is_paused());
        assert!(sched.tick().is_empty());

        sched.resume();
        assert_eq!(sched.tick(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_wait_for_an_executor() {
        let sched = scheduler();
        let id = sched.schedule(ScheduleOptions::new("a"));
        assert!(sched.tick().is_empty());
        assert!(!sched.get(id).unwrap().running);

        sched.set_executor(Gate::new());
        assert_eq!(sched.tick(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_running_drops_task_and_frees_lane() {
        let sched = scheduler();
        let gate = Gate::new();
        sched.set_executor(gate.clone());

        let a = sched.schedule(ScheduleOptions::new("a").every_ms(1_000));
        let b = sched.schedule(ScheduleOptions::new("b"));
        assert_eq!(sched.tick(), vec![a]);

        assert!(sched.cancel(a));
        assert!(!sched.cancel(a));
        // a is still in flight, the lane stays busy
        assert!(sched.tick().is_empty());

        gate.release(1);
        settle().await;
        assert!(sched.get(a).is_none());
        assert_eq!(sched.tick(), vec![b]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_where_matches_on_snapshot() {
        let sched = scheduler();
        sched.schedule(ScheduleOptions::new("scan").with_input(json!({"site": "a"})));
        sched.schedule(ScheduleOptions::new("scan").with_input(json!({"site": "b"})));
        let keep = sched.schedule(ScheduleOptions::new("report").with_lane(Lane::Parallel));

        let removed = sched.cancel_where(|t| t.task_type == "scan" && t.input["site"] == "a");
        assert_eq!(removed, 1);
        assert_eq!(sched.cancel_where(|t| t.task_type == "scan"), 1);
        assert_eq!(sched.list().len(), 1);
        assert!(sched.get(keep).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn query_filters_and_paginates() {
        let sched = scheduler();
        for _ in 0..3 {
            sched.schedule(ScheduleOptions::new("scan").with_lane(Lane::Parallel));
        }
        sched.schedule(ScheduleOptions::new("report"));

        let page = sched.query(&TaskQuery::new().with_lane(Lane::Parallel).with_limit(2));
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);

        let page = sched.query(&TaskQuery::new().with_kind("report"));
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].lane, Lane::Exclusive);

        let page = sched.query(&TaskQuery::new().with_running(true));
        assert_eq!(page.total, 0);

        let page = sched.query(&TaskQuery::new().with_offset(10));
        assert_eq!(page.total, 4);
        assert!(page.items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ids_are_monotonic() {
        let sched = scheduler();
        let a = sched.schedule(ScheduleOptions::new("a"));
        let b = sched.schedule(ScheduleOptions::new("b"));
        assert!(b > a);
    }
}
