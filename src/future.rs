//! Scheduled-task future
//!
//! [`ScheduleFuture`] binds a user task to an extended cron pattern and
//! presents a future-like contract over its repeated execution: each
//! `get` observes the next tick to complete, listeners receive a frozen
//! snapshot per completed tick, `cancel` retires the schedule, and a
//! terminal handle serializes as a frozen snapshot of its last outcome.
//!
//! All mutable state lives behind one per-handle mutex. The mutex is
//! never held across the task await, listener dispatch, engine calls or
//! task spawns; the per-tick gate (a `watch` channel used once) is the
//! hand-off primitive between the runner and waiters.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use uuid::Uuid;

use crate::context::SchedulerContext;
use crate::pattern::SchedulePattern;
use crate::registry::ScheduleIdent;
use crate::snapshot::{ScheduleSnapshot, TerminalState};
use crate::stats::ScheduleStatistics;
use crate::timer::TimeoutObject;
use crate::types::{Result, ScheduleError, TaskError, TickOutcome};
use crate::worker;

/// The user task: invoked once per tick, producing the tick's result.
pub type TaskFn<R> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;

/// Listener callback, applied to a frozen per-tick snapshot.
pub type ListenerFn<R> = Arc<dyn Fn(&ScheduleSnapshot<R>) + Send + Sync>;

/// Token identifying one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// Everything a live handle needs beyond its own state. A handle
/// restored from a terminal snapshot has none of this.
struct Binding<R> {
    pattern: SchedulePattern,
    task: TaskFn<R>,
    ctx: SchedulerContext,
}

/// Mutable state, guarded by the handle mutex.
struct TickState<R> {
    cancelled: bool,
    done: bool,
    /// Started ticks; bounded by `max_calls` when positive.
    call_cnt: u32,
    outcome: TickOutcome<R>,
    /// Single-use gate for the tick currently awaited; replaced on every
    /// completion, `None` once done.
    res_gate: Option<watch::Sender<bool>>,
    /// Execution count at which listeners were last notified.
    last_listener_exec_cnt: u32,
    listeners: Vec<(ListenerId, ListenerFn<R>)>,
    stats: ScheduleStatistics,
}

struct FutureInner<R> {
    key: Uuid,
    binding: Option<Binding<R>>,
    state: Mutex<TickState<R>>,
    /// One-shot: the engine is told to drop the registration at most once.
    descheduled: AtomicBool,
    sync_notify: AtomicBool,
    concur_notify: AtomicBool,
    /// Engine registration id; set once, never re-assigned.
    id: OnceLock<String>,
}

/// Handle to one scheduled task. Cheap to clone; all clones share state.
pub struct ScheduleFuture<R> {
    inner: Arc<FutureInner<R>>,
}

impl<R> Clone for ScheduleFuture<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> fmt::Debug for ScheduleFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleFuture")
            .field("key", &self.inner.key)
            .field(
                "pattern",
                &self.inner.binding.as_ref().map(|b| b.pattern.raw()),
            )
            .field("id", &self.inner.id.get())
            .finish_non_exhaustive()
    }
}

impl<R: Clone + Send + Sync + 'static> ScheduleFuture<R> {
    pub(crate) fn new(ctx: SchedulerContext, pattern: SchedulePattern, task: TaskFn<R>) -> Self {
        let config = ctx.config();
        let sync_notify = config.sync_notify;
        let concur_notify = config.concur_notify;
        let (gate, _) = watch::channel(false);

        Self {
            inner: Arc::new(FutureInner {
                key: Uuid::new_v4(),
                binding: Some(Binding { pattern, task, ctx }),
                state: Mutex::new(TickState {
                    cancelled: false,
                    done: false,
                    call_cnt: 0,
                    outcome: TickOutcome::Pending,
                    res_gate: Some(gate),
                    last_listener_exec_cnt: 0,
                    listeners: Vec::new(),
                    stats: ScheduleStatistics::new(),
                }),
                descheduled: AtomicBool::new(false),
                sync_notify: AtomicBool::new(sync_notify),
                concur_notify: AtomicBool::new(concur_notify),
                id: OnceLock::new(),
            }),
        }
    }

    /// Rebuild a terminal handle from its wire form: done, no cron
    /// registration, no task, no listeners.
    pub(crate) fn restore(state: TerminalState<R>) -> Self {
        let outcome = match (state.last_err, state.last_res) {
            (Some(msg), _) => TickOutcome::Err(TaskError::from_message(msg)),
            (None, Some(res)) => TickOutcome::Ok(res),
            (None, None) => TickOutcome::Pending,
        };
        let exec_cnt = state.stats.execution_count();

        Self {
            inner: Arc::new(FutureInner {
                key: Uuid::new_v4(),
                binding: None,
                state: Mutex::new(TickState {
                    cancelled: state.cancelled,
                    done: true,
                    call_cnt: exec_cnt,
                    outcome,
                    res_gate: None,
                    // Left at zero so a listener added after restoration
                    // still receives the catch-up delivery of the frozen
                    // last outcome.
                    last_listener_exec_cnt: 0,
                    listeners: Vec::new(),
                    stats: state.stats,
                }),
                descheduled: AtomicBool::new(true),
                sync_notify: AtomicBool::new(state.sync_notify),
                concur_notify: AtomicBool::new(state.concur_notify),
                id: OnceLock::new(),
            }),
        }
    }

    /// Freeze the terminal wire form under the mutex.
    pub(crate) fn to_terminal(&self) -> TerminalState<R> {
        let st = self.inner.state.lock().unwrap();
        let (last_res, last_err) = match &st.outcome {
            TickOutcome::Pending => (None, None),
            TickOutcome::Ok(res) => (Some(res.clone()), None),
            TickOutcome::Err(err) => (None, Some(err.rendered_chain())),
        };
        TerminalState {
            cancelled: st.cancelled,
            last_res,
            last_err,
            stats: st.stats.clone(),
            sync_notify: self.sync_notify(),
            concur_notify: self.concurrent_notify(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle: registration, tick runner, deschedule
    // ------------------------------------------------------------------

    /// Announce the handle to the registry and register with the cron
    /// engine, either immediately or after the pattern's delay.
    pub(crate) async fn activate(&self) {
        let Some(binding) = self.inner.binding.as_ref() else {
            return;
        };

        binding.ctx.registry().on_scheduled(&self.ident());

        let delay = binding.pattern.delay_secs();
        if delay > 0 {
            let end_time = self.create_time() + Duration::seconds(i64::from(delay));
            binding
                .ctx
                .timer()
                .add_timeout_object(Arc::new(DelayedRegistration {
                    future: self.clone(),
                    end_time,
                }));
        } else {
            self.register_with_engine().await;
        }
    }

    async fn register_with_engine(&self) {
        let Some(binding) = self.inner.binding.as_ref() else {
            return;
        };
        if self.is_cancelled() {
            // Cancelled while waiting out the start delay; never register.
            return;
        }

        let callback = self.tick_callback();
        match binding.ctx.engine().schedule(binding.pattern.cron(), callback).await {
            Ok(id) => {
                let _ = self.inner.id.set(id);
            }
            Err(err) => {
                // The cron tail was validated at construction; a rejection
                // here is an internal invariant violation.
                tracing::error!(
                    pattern = %binding.pattern.raw(),
                    error = %err,
                    "validated cron expression rejected by engine"
                );
                debug_assert!(false, "validated cron expression rejected by engine: {err}");
            }
        }
    }

    fn tick_callback(&self) -> crate::engine::TickCallback {
        let future = self.clone();
        Arc::new(move || {
            let future = future.clone();
            async move { future.run_tick().await }.boxed()
        })
    }

    /// One cron firing: Enter, Execute, Exit.
    pub(crate) async fn run_tick(&self) {
        let Some(binding) = self.inner.binding.as_ref() else {
            return;
        };

        if !self.enter_tick(binding) {
            return;
        }

        let outcome = Self::execute(binding).await;

        if !self.exit_tick(binding, outcome) {
            self.deschedule().await;
        }
    }

    /// Enter phase: claim the tick or abort. A skipped firing touches
    /// neither the call counter nor the gate.
    fn enter_tick(&self, binding: &Binding<R>) -> bool {
        let mut st = self.inner.state.lock().unwrap();

        if st.done || st.cancelled {
            return false;
        }
        if st.stats.is_running() {
            tracing::warn!(
                pattern = %binding.pattern.raw(),
                "tick fired while the previous execution is still running; skipping"
            );
            return false;
        }
        let max_calls = binding.pattern.max_calls();
        if max_calls > 0 && st.call_cnt == max_calls {
            return false;
        }

        st.call_cnt += 1;
        st.stats.on_start();
        debug_assert!(st.res_gate.is_some());
        true
    }

    /// Execute phase, no lock held. Task failures and panics both become
    /// the tick's error outcome.
    async fn execute(binding: &Binding<R>) -> TickOutcome<R> {
        let task = binding.task.clone();
        let guarded = AssertUnwindSafe(async move { task().await }).catch_unwind();
        match guarded.await {
            Ok(Ok(res)) => TickOutcome::Ok(res),
            Ok(Err(err)) => {
                tracing::error!(
                    pattern = %binding.pattern.raw(),
                    error = %format!("{err:#}"),
                    "scheduled task failed"
                );
                TickOutcome::Err(TaskError::new(err))
            }
            Err(payload) => {
                let msg = worker::panic_message(payload.as_ref());
                tracing::error!(
                    pattern = %binding.pattern.raw(),
                    "scheduled task panicked: {msg}"
                );
                TickOutcome::Err(TaskError::from_message(format!(
                    "scheduled task panicked: {msg}"
                )))
            }
        }
    }

    /// Exit phase: record the outcome, advance or retire the gate, then
    /// (outside the lock) release waiters and notify listeners.
    /// Returns false when this was the schedule's last tick.
    fn exit_tick(&self, binding: &Binding<R>, outcome: TickOutcome<R>) -> bool {
        let notify;
        let released: Option<watch::Sender<bool>>;
        let more_ticks;
        {
            let mut st = self.inner.state.lock().unwrap();

            st.outcome = outcome.clone();
            st.stats.on_end();

            let exec_cnt = st.stats.execution_count();
            if st.last_listener_exec_cnt != exec_cnt {
                notify = true;
                st.last_listener_exec_cnt = exec_cnt;
            } else {
                notify = false;
            }

            let max_calls = binding.pattern.max_calls();
            if (max_calls > 0 && st.call_cnt == max_calls) || st.cancelled {
                st.done = true;
                released = st.res_gate.take();
                more_ticks = false;
            } else {
                let (fresh, _) = watch::channel(false);
                released = st.res_gate.replace(fresh);
                more_ticks = true;
            }
        }

        // Unblock every waiter that took this tick's gate. On the final
        // tick the retired gate is the same sender, opened once.
        if let Some(gate) = released {
            gate.send_replace(true);
        }

        if notify {
            self.notify_listeners(outcome);
        }

        more_ticks
    }

    /// Tell the engine and registry to drop the handle, at most once.
    pub(crate) async fn deschedule(&self) {
        if self
            .inner
            .descheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let Some(binding) = self.inner.binding.as_ref() else {
            return;
        };
        if let Some(id) = self.inner.id.get() {
            binding.ctx.engine().deschedule(id).await;
        }
        binding.ctx.registry().on_descheduled(&self.ident());
    }

    fn ident(&self) -> ScheduleIdent {
        ScheduleIdent {
            key: self.inner.key,
            pattern: self.pattern().unwrap_or_default().to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Future facade
    // ------------------------------------------------------------------

    /// Await the next tick completed after this call and return its
    /// result. Returns the terminal last value immediately once done.
    pub async fn get(&self) -> Result<Option<R>> {
        match self.ensure_get()? {
            None => self.last(),
            Some(mut rx) => match rx.wait_for(|open| *open).await {
                Ok(_) => self.last(),
                Err(_) => self.wait_broken(),
            },
        }
    }

    /// Like [`get`](Self::get), failing with [`ScheduleError::Timeout`]
    /// if no tick completes within `timeout`. The gate is untouched; a
    /// later `get` still observes the next tick.
    pub async fn get_timeout(&self, timeout: std::time::Duration) -> Result<Option<R>> {
        match self.ensure_get()? {
            None => self.last(),
            Some(mut rx) => {
                match tokio::time::timeout(timeout, rx.wait_for(|open| *open)).await {
                    Err(_) => Err(ScheduleError::Timeout),
                    Ok(Ok(_)) => self.last(),
                    Ok(Err(_)) => self.wait_broken(),
                }
            }
        }
    }

    /// Take a receiver on the current gate, or `None` when the terminal
    /// value should be returned directly.
    fn ensure_get(&self) -> Result<Option<watch::Receiver<bool>>> {
        let st = self.inner.state.lock().unwrap();
        if st.cancelled {
            return Err(ScheduleError::Cancelled);
        }
        if st.done {
            return Ok(None);
        }
        Ok(st.res_gate.as_ref().map(watch::Sender::subscribe))
    }

    /// The gate channel closed without opening: the handle was cancelled
    /// (or dropped) while we waited.
    fn wait_broken(&self) -> Result<Option<R>> {
        if self.is_cancelled() {
            Err(ScheduleError::Cancelled)
        } else if self.is_done() {
            self.last()
        } else {
            Err(ScheduleError::Interrupted)
        }
    }

    /// Result of the most recently completed tick: `None` before the
    /// first completion, otherwise the stored result or error.
    pub fn last(&self) -> Result<Option<R>> {
        self.inner.state.lock().unwrap().outcome.to_last()
    }

    /// Cancel the schedule. Returns false when the handle already ran to
    /// completion. A tick in flight finishes normally and retires the
    /// handle on its way out.
    pub async fn cancel(&self) -> bool {
        let dropped_gate;
        {
            let mut st = self.inner.state.lock().unwrap();
            if st.done {
                return false;
            }
            if st.cancelled {
                return true;
            }
            if st.stats.is_running() {
                dropped_gate = None;
            } else {
                st.done = true;
                // Dropping the gate (instead of opening it) tells waiters
                // there is no tick result to report.
                dropped_gate = st.res_gate.take();
            }
            st.cancelled = true;
        }
        drop(dropped_gate);

        self.deschedule().await;
        true
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a listener for every subsequently completed tick. If a
    /// tick already completed that no listener delivery has covered, this
    /// listener alone receives a catch-up snapshot immediately.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ScheduleSnapshot<R>) + Send + Sync + 'static,
    {
        let id = ListenerId(Uuid::new_v4());
        let listener: ListenerFn<R> = Arc::new(listener);

        let catch_up = {
            let mut st = self.inner.state.lock().unwrap();
            st.listeners.push((id, listener.clone()));

            let exec_cnt = st.stats.execution_count();
            if exec_cnt > 0 && st.last_listener_exec_cnt != exec_cnt {
                st.last_listener_exec_cnt = exec_cnt;
                Some(st.outcome.clone())
            } else {
                None
            }
        };

        if let Some(outcome) = catch_up {
            self.notify_one(listener, outcome);
        }
        id
    }

    /// Remove listeners by token. No delivery happens on removal.
    pub fn stop_listen(&self, ids: &[ListenerId]) {
        let mut st = self.inner.state.lock().unwrap();
        st.listeners.retain(|(id, _)| !ids.contains(id));
    }

    /// Catch-up delivery to a single freshly added listener.
    fn notify_one(&self, listener: ListenerFn<R>, outcome: TickOutcome<R>) {
        let snapshot = ScheduleSnapshot::new(self.clone(), outcome);
        if self.sync_notify() {
            worker::run_guarded("schedule listener", move || listener(&snapshot));
        } else {
            worker::spawn_guarded("schedule listener", move || listener(&snapshot));
        }
    }

    /// Per-tick fan-out. Every listener sees the same frozen snapshot.
    fn notify_listeners(&self, outcome: TickOutcome<R>) {
        let listeners: Vec<ListenerFn<R>> = {
            let st = self.inner.state.lock().unwrap();
            st.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        if listeners.is_empty() {
            return;
        }

        let snapshot = ScheduleSnapshot::new(self.clone(), outcome);
        if self.concurrent_notify() {
            for listener in listeners {
                let snapshot = snapshot.clone();
                worker::spawn_guarded("schedule listener", move || listener(&snapshot));
            }
        } else {
            worker::spawn_guarded("schedule listener batch", move || {
                for listener in listeners {
                    worker::run_guarded("schedule listener", || listener(&snapshot));
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The extended pattern this handle was built from. `None` on a
    /// handle restored from a terminal snapshot.
    pub fn pattern(&self) -> Option<&str> {
        self.inner.binding.as_ref().map(|b| b.pattern.raw())
    }

    /// The bare cron tail. `None` on a restored handle.
    pub fn cron(&self) -> Option<&str> {
        self.inner.binding.as_ref().map(|b| b.pattern.cron())
    }

    /// Start delay in seconds; 0 on a restored handle.
    pub fn delay_secs(&self) -> u32 {
        self.inner
            .binding
            .as_ref()
            .map(|b| b.pattern.delay_secs())
            .unwrap_or(0)
    }

    /// Invocation bound; 0 means unbounded (and a restored handle).
    pub fn max_calls(&self) -> u32 {
        self.inner
            .binding
            .as_ref()
            .map(|b| b.pattern.max_calls())
            .unwrap_or(0)
    }

    /// Cron engine registration id; `None` until registered.
    pub fn id(&self) -> Option<&str> {
        self.inner.id.get().map(String::as_str)
    }

    /// Handle key, stable across the handle's lifetime.
    pub fn key(&self) -> Uuid {
        self.inner.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().unwrap().cancelled
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().unwrap().done
    }

    /// True while a tick is executing.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().unwrap().stats.is_running()
    }

    /// Number of completed ticks.
    pub fn count(&self) -> u32 {
        self.inner.state.lock().unwrap().stats.execution_count()
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.inner.state.lock().unwrap().stats.create_time()
    }

    /// When the schedule came into being; identical to [`create_time`](Self::create_time).
    pub fn start_time(&self) -> DateTime<Utc> {
        self.create_time()
    }

    pub fn last_start_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().unwrap().stats.last_start_time()
    }

    pub fn last_finish_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().unwrap().stats.last_end_time()
    }

    pub fn last_execution_ms(&self) -> u64 {
        self.inner.state.lock().unwrap().stats.last_execution_ms()
    }

    pub fn last_idle_ms(&self) -> u64 {
        self.inner.state.lock().unwrap().stats.last_idle_ms()
    }

    pub fn average_execution_ms(&self) -> f64 {
        self.inner.state.lock().unwrap().stats.average_execution_ms()
    }

    pub fn average_idle_ms(&self) -> f64 {
        self.inner.state.lock().unwrap().stats.average_idle_ms()
    }

    /// Wall-clock footprint so far: execution plus idle.
    pub fn duration_ms(&self) -> u64 {
        self.inner.state.lock().unwrap().stats.duration_ms()
    }

    /// A point-in-time copy of the statistics.
    pub fn stats(&self) -> ScheduleStatistics {
        self.inner.state.lock().unwrap().stats.clone()
    }

    /// Whether catch-up notifications run on the registering caller.
    pub fn sync_notify(&self) -> bool {
        self.inner.sync_notify.load(Ordering::SeqCst)
    }

    pub fn set_sync_notify(&self, sync_notify: bool) {
        self.inner.sync_notify.store(sync_notify, Ordering::SeqCst);
    }

    /// Whether per-tick dispatch uses one worker task per listener.
    pub fn concurrent_notify(&self) -> bool {
        self.inner.concur_notify.load(Ordering::SeqCst)
    }

    pub fn set_concurrent_notify(&self, concur_notify: bool) {
        self.inner.concur_notify.store(concur_notify, Ordering::SeqCst);
    }

    /// Upcoming execution instants of the bare cron expression, starting
    /// from `start` (clamped to the end of the start delay). Empty once
    /// done or cancelled. When the pattern bounds invocations, at most
    /// `max_calls` instants are returned, regardless of how many calls
    /// have already happened.
    pub fn next_execution_times(&self, count: usize, start: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        debug_assert!(count > 0);
        if count == 0 || self.is_done() || self.is_cancelled() {
            return Vec::new();
        }
        let Some(binding) = self.inner.binding.as_ref() else {
            return Vec::new();
        };

        let mut count = count;
        let max_calls = binding.pattern.max_calls();
        if max_calls > 0 {
            count = count.min(max_calls as usize);
        }

        let floor = self.create_time() + Duration::seconds(i64::from(binding.pattern.delay_secs()));
        let start = start.max(floor);

        binding.pattern.expression().next_matching_times(start, count)
    }

    /// The next execution instant after now, if the schedule is live.
    pub fn next_execution_time(&self) -> Option<DateTime<Utc>> {
        self.next_execution_times(1, Utc::now()).first().copied()
    }
}

/// Defers cron registration until the pattern's start delay elapses.
struct DelayedRegistration<R> {
    future: ScheduleFuture<R>,
    end_time: DateTime<Utc>,
}

#[async_trait::async_trait]
impl<R: Clone + Send + Sync + 'static> TimeoutObject for DelayedRegistration<R> {
    fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    async fn on_timeout(&self) {
        debug_assert!(self.future.id().is_none());
        self.future.register_with_engine().await;
    }
}
