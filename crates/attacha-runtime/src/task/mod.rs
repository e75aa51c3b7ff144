//! Tasks: the schedulable unit of work
//!
//! A `Task` owns its callable, its append-only result stream and its fiber.
//! It is shared through `Arc` between its creator, the executor queues and
//! anything waiting on it; the fiber body only keeps a `Weak` back-reference.
//!
//! # Suspension protocol
//!
//! ```text
//!   task (inside fiber)                worker
//!   ───────────────────                ──────
//!   epoch = prepare_suspend()
//!   publish self in a wait list
//!   switch_out() ───────────────────►  resume() returns
//!                                      release relock slots
//!                                      re-enqueue if yielding,
//!                                      else give back the running slot
//!                                      drop the fiber lock
//!   ... wake() / wake_if_epoch(epoch) re-admits the task through the
//!   running budget, the next worker blocks on the fiber lock until the
//!   switch is done ...
//!   relock slots re-acquired  ◄──────  resume()
//! ```
//!
//! The wait epoch makes each wake exactly-once per suspension: a notifier
//! and the timer racing on the same waiter cannot both enqueue it.

pub(crate) mod bridge;
pub mod local;
pub(crate) mod result;

use crate::fiber::{Fiber, FiberHandle};
use crate::scheduler::Executor;
use crate::sync::unify::{MutexUnify, RelockState};
use crate::tls;
use crate::wait;
use attacha_core::constants::MAX_RELOCKS;
use attacha_core::{kdebug, kerror};
use attacha_core::{Args, Callable, SchedError, SchedResult, SpinLock, TaskId, TaskState, Value};
use bridge::NativeSignal;
use local::TaskLocal;
use parking_lot::Mutex;
use result::{CompletionHook, ResultState};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Identity recorded as the holder of a task-aware lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOwner {
    Task(TaskId),
    Native(ThreadId),
}

impl LockOwner {
    /// Owner identity of the calling context
    pub fn current() -> Self {
        match tls::current_task() {
            Some(t) => LockOwner::Task(t.id()),
            None => LockOwner::Native(std::thread::current().id()),
        }
    }
}

/// Optional knobs for `Task::with_options`
#[derive(Clone, Default)]
pub struct TaskOptions {
    /// Share the creator's task-local store
    pub use_local: bool,
    /// Called with the error as its only argument when the body fails
    pub exception_handler: Option<Callable>,
    /// Relative deadline; once passed the task counts as cancelled
    pub timeout: Option<Duration>,
    /// Pause after every `Task::result` until started again
    pub yield_mode: bool,
    /// Diagnostic name, kept only when task naming is enabled
    pub name: Option<String>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_local(mut self, share: bool) -> Self {
        self.use_local = share;
        self
    }

    pub fn exception_handler(mut self, handler: Callable) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn yield_mode(mut self, enable: bool) -> Self {
        self.yield_mode = enable;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SuspendReason {
    /// Parked in a wait list or on the timer
    Wait = 0,
    /// Runnable again as soon as the switch completes
    Yield = 1,
}

/// Low bit of `wait_state`; the rest is the suspension epoch
const AWAKED: u64 = 1;

/// Schedulable unit of work
pub struct Task {
    id: TaskId,
    name: Option<String>,
    /// `None` for bridge tasks
    executor: Option<Arc<Executor>>,
    func: Option<Callable>,
    args: Mutex<Option<Args>>,
    exception_handler: Option<Callable>,
    deadline: Option<Instant>,
    local: OnceLock<Arc<TaskLocal>>,
    results: Mutex<ResultState>,

    state: AtomicU8,
    started: AtomicBool,
    make_cancel: AtomicBool,
    /// Cancellation was reported to the body at a checkpoint
    cancel_observed: AtomicBool,
    yield_mode: bool,
    yield_paused: AtomicBool,
    /// Holds a running-budget slot; dropped while parked in a wait
    admitted: AtomicBool,
    /// Running and planned counters already released
    accounted: AtomicBool,

    wait_state: AtomicU64,
    suspend_reason: AtomicU8,
    relocks: SpinLock<Vec<(MutexUnify, RelockState)>>,

    /// Held by a worker for the whole resume plus post-switch bookkeeping
    fiber: Mutex<Option<Fiber>>,
    fiber_handle: OnceLock<FiberHandle>,

    bridge: Option<NativeSignal>,
}

impl Task {
    /// Create an unstarted task bound to the current executor
    ///
    /// Blocks (or suspends, inside a task) while the executor is at its
    /// planned-task limit.
    pub fn new(func: Callable, args: Args) -> SchedResult<Arc<Task>> {
        Self::with_options(func, args, TaskOptions::default())
    }

    pub fn with_options(func: Callable, args: Args, opts: TaskOptions) -> SchedResult<Arc<Task>> {
        let executor = tls::effective_executor().ok_or(SchedError::NotInitialized)?;
        executor.acquire_planned()?;

        let local = OnceLock::new();
        if opts.use_local {
            let _ = local.set(Task::task_local());
        }
        let name = if executor.config().enable_task_naming { opts.name } else { None };

        let task = Arc::new(Task {
            id: TaskId::next(),
            name,
            executor: Some(Arc::clone(&executor)),
            func: Some(func),
            args: Mutex::new(Some(args)),
            exception_handler: opts.exception_handler,
            deadline: opts.timeout.map(|t| Instant::now() + t),
            local,
            results: Mutex::new(ResultState::default()),
            state: AtomicU8::new(TaskState::Planned.into()),
            started: AtomicBool::new(false),
            make_cancel: AtomicBool::new(false),
            cancel_observed: AtomicBool::new(false),
            yield_mode: opts.yield_mode,
            yield_paused: AtomicBool::new(false),
            admitted: AtomicBool::new(false),
            accounted: AtomicBool::new(false),
            // A wake before the first suspension is a no-op
            wait_state: AtomicU64::new(AWAKED),
            suspend_reason: AtomicU8::new(SuspendReason::Wait as u8),
            relocks: SpinLock::new(Vec::new()),
            fiber: Mutex::new(None),
            fiber_handle: OnceLock::new(),
            bridge: None,
        });
        if executor.config().debug_logging {
            kdebug!("task {} planned", task.id);
        }
        Ok(task)
    }

    /// Synthetic, already-started task with no body
    ///
    /// Stands in for a native thread inside wait lists; waking it signals
    /// the creating thread. I/O collaborators also use it as a completion
    /// handle: they finish it with `finalize_result` and anyone may await it.
    pub fn bridge() -> Arc<Task> {
        Arc::new(Task {
            id: TaskId::next(),
            name: None,
            executor: None,
            func: None,
            args: Mutex::new(None),
            exception_handler: None,
            deadline: None,
            local: OnceLock::new(),
            results: Mutex::new(ResultState::default()),
            state: AtomicU8::new(TaskState::Running.into()),
            started: AtomicBool::new(true),
            make_cancel: AtomicBool::new(false),
            cancel_observed: AtomicBool::new(false),
            yield_mode: false,
            yield_paused: AtomicBool::new(false),
            admitted: AtomicBool::new(false),
            accounted: AtomicBool::new(true),
            wait_state: AtomicU64::new(0),
            suspend_reason: AtomicU8::new(SuspendReason::Wait as u8),
            relocks: SpinLock::new(Vec::new()),
            fiber: Mutex::new(None),
            fiber_handle: OnceLock::new(),
            bridge: Some(NativeSignal::new()),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state.into(), Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_ended(&self) -> bool {
        self.results.lock().end_of_life
    }

    /// Cancellation was requested with `cancel`
    pub fn is_cancelled(&self) -> bool {
        self.make_cancel.load(Ordering::Acquire)
    }

    pub fn is_yield_mode(&self) -> bool {
        self.yield_mode
    }

    pub fn is_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Snapshot of every value produced so far
    pub fn results(&self) -> Vec<Value> {
        self.results.lock().values.clone()
    }

    /// This task's local store, created on first access
    pub fn local(&self) -> Arc<TaskLocal> {
        Arc::clone(self.local.get_or_init(|| Arc::new(TaskLocal::new())))
    }

    #[inline]
    pub(crate) fn executor_opt(&self) -> Option<Arc<Executor>> {
        self.executor.clone()
    }

    pub(crate) fn lock_owner(&self) -> LockOwner {
        match &self.bridge {
            Some(signal) => LockOwner::Native(signal.thread()),
            None => LockOwner::Task(self.id),
        }
    }

    pub(crate) fn cancellation_requested(&self) -> bool {
        self.make_cancel.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub(crate) fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_admitted(&self) {
        self.admitted.store(true, Ordering::Release);
    }

    /// Give up the running slot; true if one was held
    pub(crate) fn release_admission(&self) -> bool {
        self.admitted.swap(false, Ordering::AcqRel)
    }

    /// The current suspension has already been woken
    pub(crate) fn is_awaked(&self) -> bool {
        self.wait_state.load(Ordering::Acquire) & AWAKED != 0
    }

    /// Claim the one-time release of the running and planned counters
    pub(crate) fn take_accounting(&self) -> bool {
        !self.accounted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn fiber_slot(&self) -> &Mutex<Option<Fiber>> {
        &self.fiber
    }

    pub(crate) fn take_suspend_reason(&self) -> SuspendReason {
        match self.suspend_reason.swap(SuspendReason::Wait as u8, Ordering::AcqRel) {
            1 => SuspendReason::Yield,
            _ => SuspendReason::Wait,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Submit the task to its executor
    ///
    /// Idempotent, except that a yield-mode task paused after `result` is
    /// resumed. Bridge tasks are always started.
    pub fn start(self: &Arc<Self>) -> SchedResult<()> {
        let Some(exec) = &self.executor else {
            return Ok(());
        };
        if self.yield_mode && self.yield_paused.swap(false, Ordering::AcqRel) {
            self.wake();
            return Ok(());
        }
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        if exec.is_shutdown() {
            return Err(SchedError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        exec.submit(Arc::clone(self));
        Ok(())
    }

    /// Request cooperative cancellation
    ///
    /// Observed by the task at its next checkpoint or suspension boundary;
    /// a task cancelled before it first runs is completed without running.
    pub fn cancel(&self) {
        self.make_cancel.store(true, Ordering::Release);
    }

    /// Index-th produced value, starting the task if needed
    ///
    /// Suspends (or blocks, on a native thread) until the value exists or
    /// the task ends; a missing value of an ended task reads as `None`.
    pub fn get_result(self: &Arc<Self>, index: usize) -> SchedResult<Value> {
        self.ensure_not_self()?;
        self.start()?;
        loop {
            let results = self.results.lock();
            if let Some(v) = results.read(index) {
                return Ok(v);
            }
            if results.end_of_life {
                return Ok(Value::None);
            }
            if self.yield_paused.load(Ordering::Acquire) {
                drop(results);
                self.start()?;
                continue;
            }
            wait::block_on_list(results, |r| &mut r.waiters, None, &[])?;
            Task::check_cancellation()?;
        }
    }

    /// Wait until the task ends
    pub fn await_task(self: &Arc<Self>) -> SchedResult<()> {
        self.ensure_not_self()?;
        self.start()?;
        loop {
            let results = self.results.lock();
            if results.end_of_life {
                return Ok(());
            }
            if self.yield_paused.load(Ordering::Acquire) {
                drop(results);
                self.start()?;
                continue;
            }
            wait::block_on_list(results, |r| &mut r.waiters, None, &[])?;
            Task::check_cancellation()?;
        }
    }

    /// Wait until the task ends and return everything it produced
    pub fn await_results(self: &Arc<Self>) -> SchedResult<Vec<Value>> {
        self.await_task()?;
        Ok(self.results())
    }

    /// Wait for every task to end, optionally starting them all first
    pub fn await_multiple(tasks: &[Arc<Task>], start: bool) -> SchedResult<()> {
        if start {
            for t in tasks {
                t.start()?;
            }
        }
        for t in tasks {
            t.await_task()?;
        }
        Ok(())
    }

    /// Wait for the first index of every task; values in task order
    pub fn await_first_results(tasks: &[Arc<Task>]) -> SchedResult<Vec<Value>> {
        for t in tasks {
            t.start()?;
        }
        tasks.iter().map(|t| t.get_result(0)).collect()
    }

    fn ensure_not_self(&self) -> SchedResult<()> {
        match tls::current_task() {
            Some(cur) if cur.id == self.id => Err(SchedError::EnvironmentMisuse("task awaited itself")),
            _ => Ok(()),
        }
    }

    /// Append an intermediate value from inside the running task
    ///
    /// In yield mode the task then pauses until started again.
    pub fn result(value: Value) -> SchedResult<()> {
        let me = tls::current_task().ok_or(SchedError::EnvironmentMisuse("Task::result outside a task"))?;
        if !me.yield_mode {
            let waiters = me.results.lock().push(value);
            wake_all(waiters.into_iter().flatten());
            return Ok(());
        }

        me.prepare_suspend();
        let waiters = {
            let mut results = me.results.lock();
            let waiters = results.push(value);
            me.yield_paused.store(true, Ordering::Release);
            waiters
        };
        wake_all(waiters.into_iter().flatten());
        me.switch_out(SuspendReason::Wait)?;
        Task::check_cancellation()
    }

    /// Finish a task from outside its body (I/O completion path)
    ///
    /// Returns false if the task had already ended.
    pub fn finalize_result(&self, value: Value) -> bool {
        self.finish(Some(value))
    }

    /// Mark the stream ended, wake everyone awaiting it and run hooks
    pub(crate) fn finish(&self, value: Option<Value>) -> bool {
        let Some((waiters, hooks)) = self.results.lock().finish(value) else {
            return false;
        };
        self.set_state(TaskState::Completed);
        wake_all(waiters);
        for hook in hooks {
            hook();
        }
        true
    }

    /// Register a callback run once when the task ends
    ///
    /// Returns false (dropping the hook) if the task already ended.
    pub(crate) fn add_completion_hook(&self, hook: CompletionHook) -> bool {
        let mut results = self.results.lock();
        if results.end_of_life {
            return false;
        }
        results.hooks.push(hook);
        true
    }

    // ========================================================================
    // Context queries
    // ========================================================================

    /// Task whose fiber is executing on this thread
    pub fn current() -> Option<Arc<Task>> {
        tls::current_task()
    }

    pub fn is_task() -> bool {
        tls::in_task()
    }

    /// Task-local store of the running task, or this thread's store
    pub fn task_local() -> Arc<TaskLocal> {
        match tls::current_task() {
            Some(t) => t.local(),
            None => tls::thread_store(),
        }
    }

    /// Cancellation checkpoint
    ///
    /// Returns `Cancelled` if the running task was cancelled or its deadline
    /// has passed. Always `Ok` on native threads.
    pub fn check_cancellation() -> SchedResult<()> {
        match tls::current_task() {
            Some(t) if t.cancellation_requested() => {
                t.cancel_observed.store(true, Ordering::Release);
                Err(SchedError::Cancelled)
            }
            _ => Ok(()),
        }
    }

    /// Cancel the running task; propagate the returned error with `?`
    pub fn self_cancel() -> SchedResult<()> {
        let me = tls::current_task().ok_or(SchedError::EnvironmentMisuse("self_cancel outside a task"))?;
        me.make_cancel.store(true, Ordering::Release);
        me.cancel_observed.store(true, Ordering::Release);
        Err(SchedError::Cancelled)
    }

    // ========================================================================
    // Suspension
    // ========================================================================

    /// Let other tasks run; a plain thread yield on native threads
    pub fn yield_now() -> SchedResult<()> {
        Self::yield_relocking(&[])
    }

    /// Yield while releasing up to three held locks
    ///
    /// The locks are released only after the task is switched out and are
    /// re-acquired, in order, before this returns.
    pub fn yield_relocking(locks: &[MutexUnify]) -> SchedResult<()> {
        if locks.len() > MAX_RELOCKS {
            return Err(SchedError::InvalidArgument("at most three locks may be relocked"));
        }
        match tls::current_task() {
            Some(me) => {
                me.prepare_suspend();
                me.set_relocks(locks);
                me.switch_out(SuspendReason::Yield)?;
                Task::check_cancellation()
            }
            None => {
                let owner = LockOwner::current();
                let states: Vec<RelockState> = locks.iter().map(|l| l.relock_begin(owner)).collect();
                std::thread::yield_now();
                relock_all(locks, states, owner)
            }
        }
    }

    /// Yield without a cancellation checkpoint (used by notifiers)
    pub(crate) fn yield_quiet(&self) {
        self.prepare_suspend();
        if self.switch_out(SuspendReason::Yield).is_err() {
            kerror!("task {} failed to re-acquire relocks after yield", self.id);
        }
    }

    pub fn sleep(duration: Duration) -> SchedResult<()> {
        Self::sleep_until(Instant::now() + duration)
    }

    /// Suspend until `wake_at`; never returns earlier
    pub fn sleep_until(wake_at: Instant) -> SchedResult<()> {
        let Some(me) = tls::current_task() else {
            let now = Instant::now();
            if wake_at > now {
                std::thread::sleep(wake_at - now);
            }
            return Ok(());
        };
        Task::check_cancellation()?;
        let exec = me.executor_opt().ok_or(SchedError::NotInitialized)?;
        while Instant::now() < wake_at {
            let epoch = me.prepare_suspend();
            exec.timer().register(Arc::clone(&me), wake_at, epoch);
            me.switch_out(SuspendReason::Wait)?;
        }
        Task::check_cancellation()
    }

    /// Open a new suspension epoch; returns it for timed wakes
    pub(crate) fn prepare_suspend(&self) -> u64 {
        let prev = self
            .wait_state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| Some(((s >> 1) + 1) << 1))
            .unwrap_or_else(|s| s);
        (prev >> 1) + 1
    }

    /// Wake the current suspension; false if it was already woken
    pub(crate) fn wake(self: &Arc<Self>) -> bool {
        let mut cur = self.wait_state.load(Ordering::Acquire);
        loop {
            if cur & AWAKED != 0 {
                return false;
            }
            match self.wait_state.compare_exchange_weak(cur, cur | AWAKED, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.dispatch_wake();
        true
    }

    /// Wake only if the task is still in suspension `epoch`
    pub(crate) fn wake_if_epoch(self: &Arc<Self>, epoch: u64) -> bool {
        let expected = epoch << 1;
        if self
            .wait_state
            .compare_exchange(expected, expected | AWAKED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.dispatch_wake();
        true
    }

    fn dispatch_wake(self: &Arc<Self>) {
        if let Some(signal) = &self.bridge {
            signal.fire();
        } else if let Some(exec) = &self.executor {
            exec.enqueue(Arc::clone(self));
        }
    }

    /// Record locks for the worker to release after the switch
    pub(crate) fn set_relocks(&self, locks: &[MutexUnify]) {
        let mut slots = self.relocks.lock();
        slots.clear();
        slots.extend(
            locks
                .iter()
                .take(MAX_RELOCKS)
                .filter(|l| !l.is_none())
                .map(|l| (l.clone(), RelockState::None)),
        );
    }

    /// Worker side: release the relock slots of a switched-out task
    pub(crate) fn release_relocks(&self) {
        let mut slots = std::mem::take(&mut *self.relocks.lock());
        if slots.is_empty() {
            return;
        }
        let owner = LockOwner::Task(self.id);
        for (lock, state) in slots.iter_mut() {
            *state = lock.relock_begin(owner);
        }
        *self.relocks.lock() = slots;
    }

    /// Switch back to the worker; returns once resumed and relocked
    pub(crate) fn switch_out(&self, reason: SuspendReason) -> SchedResult<()> {
        let Some(handle) = self.fiber_handle.get().copied() else {
            return Err(SchedError::EnvironmentMisuse("suspend outside the task's own fiber"));
        };
        self.suspend_reason.store(reason as u8, Ordering::Release);
        // Safety: only the running task reaches here, on its own fiber
        unsafe { handle.suspend() };

        let slots = std::mem::take(&mut *self.relocks.lock());
        let (locks, states): (Vec<_>, Vec<_>) = slots.into_iter().unzip();
        relock_all(&locks, states, LockOwner::Task(self.id))
    }

    /// Bridge side: block the native thread until woken or `deadline`
    pub(crate) fn wait_signal(&self, deadline: Option<Instant>) -> bool {
        match &self.bridge {
            Some(signal) => signal.wait(deadline),
            None => false,
        }
    }

    // ========================================================================
    // Fiber body
    // ========================================================================

    /// Build the fiber that runs this task's body
    pub(crate) fn make_fiber(self: &Arc<Self>, exec: &Executor) -> Fiber {
        let weak = Arc::downgrade(self);
        Fiber::new(exec.stack_pool(), move |handle| run_body(weak, handle))
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(exec) = &self.executor {
            if !self.accounted.swap(true, Ordering::AcqRel) {
                exec.release_planned();
            }
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("bridge", &self.bridge.is_some())
            .finish()
    }
}

fn wake_all(tasks: impl IntoIterator<Item = Arc<Task>>) {
    for t in tasks {
        t.wake();
    }
}

fn relock_all(locks: &[MutexUnify], states: Vec<RelockState>, owner: LockOwner) -> SchedResult<()> {
    let mut first_err = None;
    for (lock, state) in locks.iter().zip(states) {
        if let Err(e) = lock.relock_end(state, owner) {
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Call `func`, turning a panic into an error
pub(crate) fn call_guarded(func: &Callable, args: Args) -> SchedResult<Value> {
    match panic::catch_unwind(AssertUnwindSafe(|| func.call(args))) {
        Ok(r) => r,
        Err(payload) => Err(SchedError::Panicked(panic_message(payload))),
    }
}

fn run_body(weak: Weak<Task>, handle: FiberHandle) {
    let (func, args, handler) = {
        let Some(task) = weak.upgrade() else { return };
        let _ = task.fiber_handle.set(handle);
        let args = task.args.lock().take().unwrap_or_default();
        (task.func.clone(), args, task.exception_handler.clone())
    };
    let Some(func) = func else { return };

    let outcome = call_guarded(&func, args);

    let Some(task) = weak.upgrade() else { return };
    match outcome {
        Ok(value) => {
            if task.cancel_observed.load(Ordering::Acquire) {
                kerror!("task {} swallowed its cancellation", task.id);
                std::process::abort();
            }
            task.finish(Some(value));
        }
        Err(e) if e.is_cancelled() && task.cancellation_requested() => {
            task.finish(None);
        }
        Err(e) => match handler {
            Some(handler) => {
                let handled = call_guarded(&handler, vec![Value::exception(e)]);
                task.finish(Some(handled.unwrap_or_else(Value::exception)));
            }
            None => {
                task.finish(Some(Value::exception(e)));
            }
        },
    }
}
