//! Executor: queues, admission control and backpressure
//!
//! One `Executor` per `Runtime`. It owns the ready queue, the cold queue of
//! started tasks held back by `max_running_tasks`, the planned-task counter
//! that makes task construction block at `max_planned_tasks`, the timer and
//! the stack pool.
//!
//! ```text
//!   Task::start ────► submit ──┬─ running < max ──► ready ──► worker
//!   wake (parked) ──► enqueue ─┤
//!                              └─ otherwise ──────► cold
//!   park     ──► running -= 1 ──► promote cold → ready
//!   complete ──► running -= 1 ──► promote cold → ready
//!            └─► planned -= 1 ──► wake one blocked constructor
//! ```
//!
//! "Running" counts tasks holding a slot: queued in `ready`, on a worker, or
//! yielding. A task parked in a wait list or on the timer gives its slot
//! back and goes through admission again when woken.
//!
//! A slotted task re-entering `ready` while cold tasks wait behind a
//! saturated budget trades places with the cold head.

use crate::config::RuntimeConfig;
use crate::memory::StackPool;
use crate::task::Task;
use crate::timer::Timer;
use crate::tls;
use crate::wait;
use attacha_core::{kdebug, SchedError, SchedResult, TaskState, Value};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Queues {
    ready: VecDeque<Arc<Task>>,
    cold: VecDeque<Arc<Task>>,
    running: usize,
}

#[derive(Default)]
struct PlannedState {
    count: usize,
    waiters: VecDeque<Arc<Task>>,
}

/// Executor statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub ready: usize,
    pub cold: usize,
    pub running: usize,
    pub planned: usize,
}

pub struct Executor {
    config: RuntimeConfig,
    queues: Mutex<Queues>,
    tasks_available: Condvar,
    planned: Mutex<PlannedState>,
    quiescent: Condvar,
    max_running: AtomicUsize,
    max_planned: AtomicUsize,
    shutdown: AtomicBool,
    timer: Arc<Timer>,
    stack_pool: Arc<StackPool>,
}

impl Executor {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(Queues::default()),
            tasks_available: Condvar::new(),
            planned: Mutex::new(PlannedState::default()),
            quiescent: Condvar::new(),
            max_running: AtomicUsize::new(config.max_running_tasks),
            max_planned: AtomicUsize::new(config.max_planned_tasks),
            shutdown: AtomicBool::new(false),
            timer: Timer::new(config.timer_interval),
            stack_pool: Arc::new(StackPool::new(config.stack_size, config.stack_pool_capacity)),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline]
    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    pub fn stack_pool(&self) -> Arc<StackPool> {
        Arc::clone(&self.stack_pool)
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ExecutorStats {
        let (ready, cold, running) = {
            let q = self.queues.lock();
            (q.ready.len(), q.cold.len(), q.running)
        };
        ExecutorStats {
            ready,
            cold,
            running,
            planned: self.planned.lock().count,
        }
    }

    // ========================================================================
    // Admission control
    // ========================================================================

    pub fn max_running_tasks(&self) -> usize {
        self.max_running.load(Ordering::Acquire)
    }

    /// Change the running budget; 0 means unlimited
    pub fn set_max_running_tasks(&self, max: usize) {
        self.max_running.store(max, Ordering::Release);
        let mut q = self.queues.lock();
        if self.promote(&mut q) > 0 {
            self.tasks_available.notify_all();
        }
    }

    pub fn max_planned_tasks(&self) -> usize {
        self.max_planned.load(Ordering::Acquire)
    }

    /// Change the planned limit; 0 means unlimited
    pub fn set_max_planned_tasks(&self, max: usize) {
        self.max_planned.store(max, Ordering::Release);
        let waiters = std::mem::take(&mut self.planned.lock().waiters);
        // Everyone re-checks against the new limit
        for w in waiters {
            w.wake();
        }
    }

    /// Whether the running budget is used up
    pub fn is_running_saturated(&self) -> bool {
        let max = self.max_running_tasks();
        max != 0 && self.queues.lock().running >= max
    }

    #[inline]
    fn has_running_room(&self, q: &Queues) -> bool {
        let max = self.max_running.load(Ordering::Acquire);
        max == 0 || q.running < max
    }

    /// Move cold tasks to the ready queue while the budget allows
    fn promote(&self, q: &mut Queues) -> usize {
        let mut moved = 0;
        while self.has_running_room(q) {
            let Some(task) = q.cold.pop_front() else { break };
            task.mark_admitted();
            task.set_state(TaskState::Queued);
            q.running += 1;
            q.ready.push_back(task);
            moved += 1;
        }
        moved
    }

    /// First start of a task
    pub(crate) fn submit(&self, task: Arc<Task>) {
        let mut q = self.queues.lock();
        // Through the cold queue so admission stays FIFO
        q.cold.push_back(task);
        let moved = self.promote(&mut q);
        drop(q);
        match moved {
            0 => {}
            1 => {
                self.tasks_available.notify_one();
            }
            _ => {
                self.tasks_available.notify_all();
            }
        }
    }

    /// Requeue a task after a wake or a yield
    pub(crate) fn enqueue(&self, task: Arc<Task>) {
        let mut q = self.queues.lock();
        let rotate = !q.cold.is_empty() && !self.has_running_room(&q);
        if task.is_admitted() && !rotate {
            q.ready.push_back(task);
            drop(q);
            self.tasks_available.notify_one();
            return;
        }
        if task.release_admission() {
            q.running = q.running.saturating_sub(1);
        }
        q.cold.push_back(task);
        let moved = self.promote(&mut q);
        drop(q);
        if moved > 0 {
            self.tasks_available.notify_all();
        }
    }

    /// Worker side: a task switched out to wait gives back its slot
    ///
    /// Runs under the task's fiber lock. A wake that already landed keeps
    /// the slot, since `enqueue` has put (or is about to put) the task in
    /// `ready` as admitted.
    pub(crate) fn park(&self, task: &Task) {
        let mut q = self.queues.lock();
        if task.is_awaked() || !task.release_admission() {
            return;
        }
        q.running = q.running.saturating_sub(1);
        if self.promote(&mut q) > 0 {
            self.tasks_available.notify_all();
        }
    }

    /// Release the running and planned slots of a finished task, once
    pub(crate) fn complete(&self, task: &Task) {
        if !task.take_accounting() {
            return;
        }
        {
            let mut q = self.queues.lock();
            if task.release_admission() {
                q.running = q.running.saturating_sub(1);
            }
            if self.promote(&mut q) > 0 {
                self.tasks_available.notify_all();
            }
        }
        if self.config.debug_logging {
            kdebug!("task {} completed", task.id());
        }
        self.release_planned();
    }

    /// Next runnable task, parking while there is none
    ///
    /// Returns `None` once shutdown is requested.
    pub(crate) fn next_task(&self) -> Option<Arc<Task>> {
        let mut q = self.queues.lock();
        loop {
            if self.is_shutdown() {
                return None;
            }
            self.promote(&mut q);
            if let Some(task) = q.ready.pop_front() {
                return Some(task);
            }
            self.tasks_available.wait_for(&mut q, self.config.park_timeout);
        }
    }

    // ========================================================================
    // Backpressure
    // ========================================================================

    /// Reserve a planned slot, waiting while the limit is reached
    pub(crate) fn acquire_planned(&self) -> SchedResult<()> {
        loop {
            let mut p = self.planned.lock();
            let max = self.max_planned.load(Ordering::Acquire);
            if max == 0 || p.count < max {
                p.count += 1;
                return Ok(());
            }
            if self.is_shutdown() {
                return Err(SchedError::ShuttingDown);
            }
            if let Err(e) = wait::block_on_list(p, |p| &mut p.waiters, None, &[]) {
                self.pass_planned_wake();
                return Err(e);
            }
            if let Err(e) = Task::check_cancellation() {
                self.pass_planned_wake();
                return Err(e);
            }
        }
    }

    /// Give up a planned slot and let one blocked constructor retry
    pub(crate) fn release_planned(&self) {
        let next = {
            let mut p = self.planned.lock();
            p.count = p.count.saturating_sub(1);
            if p.count == 0 {
                self.quiescent.notify_all();
            }
            p.waiters.pop_front()
        };
        if let Some(w) = next {
            w.wake();
        }
    }

    fn pass_planned_wake(&self) {
        let next = self.planned.lock().waiters.pop_front();
        if let Some(w) = next {
            w.wake();
        }
    }

    // ========================================================================
    // Quiescence
    // ========================================================================

    /// Block the native caller until no planned task remains
    pub fn await_no_tasks(&self) -> SchedResult<()> {
        if tls::in_task() {
            return Err(SchedError::EnvironmentMisuse("await_no_tasks inside a task"));
        }
        let mut p = self.planned.lock();
        while p.count > 0 {
            self.quiescent.wait(&mut p);
        }
        Ok(())
    }

    /// Like `await_no_tasks` with a timeout; true if quiescent
    pub fn await_end_tasks(&self, timeout: Duration) -> SchedResult<bool> {
        if tls::in_task() {
            return Err(SchedError::EnvironmentMisuse("await_end_tasks inside a task"));
        }
        let deadline = Instant::now() + timeout;
        let mut p = self.planned.lock();
        while p.count > 0 {
            if self.quiescent.wait_until(&mut p, deadline).timed_out() {
                return Ok(p.count == 0);
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop handing out tasks and wake every parked worker
    pub(crate) fn begin_shutdown(&self) {
        {
            let _q = self.queues.lock();
            self.shutdown.store(true, Ordering::Release);
        }
        self.tasks_available.notify_all();
        let waiters = std::mem::take(&mut self.planned.lock().waiters);
        wait::cancel_waiters(waiters);
    }

    /// Finish every still-queued task as cancelled
    ///
    /// Finishing wakes awaiters, which may queue more tasks, so this loops
    /// until both queues stay empty.
    pub(crate) fn drain(&self) {
        loop {
            let drained: Vec<Arc<Task>> = {
                let mut q = self.queues.lock();
                let mut all: Vec<_> = q.ready.drain(..).collect();
                all.extend(q.cold.drain(..));
                all
            };
            if drained.is_empty() {
                break;
            }
            for task in drained {
                task.cancel();
                task.finish(Some(Value::exception(SchedError::ShuttingDown)));
                self.complete(&task);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_await_end_tasks_when_idle() {
        let exec = Executor::new(RuntimeConfig::new());
        assert_eq!(exec.await_end_tasks(Duration::from_millis(1)), Ok(true));
        assert_eq!(exec.stats(), ExecutorStats::default());
    }

    #[test]
    fn test_planned_limit_blocks_until_release() {
        let exec = Executor::new(RuntimeConfig::new().max_planned_tasks(1));
        exec.acquire_planned().unwrap();

        let e2 = Arc::clone(&exec);
        let blocked = std::thread::spawn(move || {
            e2.acquire_planned().unwrap();
            Instant::now()
        });
        std::thread::sleep(Duration::from_millis(30));
        let released_at = Instant::now();
        exec.release_planned();
        assert!(blocked.join().unwrap() >= released_at);
        assert_eq!(exec.stats().planned, 1);
    }

    #[test]
    fn test_running_limit_adjustable() {
        let exec = Executor::new(RuntimeConfig::new().max_running_tasks(2));
        assert_eq!(exec.max_running_tasks(), 2);
        assert!(!exec.is_running_saturated());
        exec.set_max_running_tasks(0);
        assert!(!exec.is_running_saturated());
    }
}
