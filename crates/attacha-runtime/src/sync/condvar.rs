//! Task-aware condition variable
//!
//! `wait` queues the caller and only then releases the associated lock
//! (through relocking), so a notify issued right after the unlock cannot be
//! missed. Waiters are woken in arrival order.

use crate::task::Task;
use crate::tls;
use crate::wait::{self, WaitOutcome};
use crate::sync::unify::MutexUnify;
use attacha_core::SchedResult;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct TaskConditionVariable {
    waiters: Mutex<VecDeque<Arc<Task>>>,
}

impl TaskConditionVariable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release `lock`, wait for a notify, re-acquire `lock`
    pub fn wait(&self, lock: &MutexUnify) -> SchedResult<()> {
        wait::block_on_list(self.waiters.lock(), |w| w, None, std::slice::from_ref(lock))?;
        Task::check_cancellation()
    }

    /// As `wait`, giving up after `timeout`; true if notified
    pub fn wait_for(&self, lock: &MutexUnify, timeout: Duration) -> SchedResult<bool> {
        self.wait_until(lock, Instant::now() + timeout)
    }

    /// As `wait`, giving up at `deadline`; true if notified
    pub fn wait_until(&self, lock: &MutexUnify, deadline: Instant) -> SchedResult<bool> {
        let outcome = wait::block_on_list(self.waiters.lock(), |w| w, Some(deadline), std::slice::from_ref(lock))?;
        Task::check_cancellation()?;
        Ok(outcome == WaitOutcome::Notified)
    }

    /// Wake the longest waiting caller
    pub fn notify_one(&self) {
        let next = self.waiters.lock().pop_front();
        if let Some(t) = next {
            t.wake();
        }
        yield_if_saturated();
    }

    /// Wake every waiter, in arrival order
    pub fn notify_all(&self) {
        let all = std::mem::take(&mut *self.waiters.lock());
        for t in all {
            t.wake();
        }
        yield_if_saturated();
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.lock().is_empty()
    }

    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// A notifying task steps aside when the running budget is used up, so the
/// tasks it just woke get a turn
fn yield_if_saturated() {
    if let Some(me) = tls::current_task() {
        if me.executor_opt().is_some_and(|e| e.is_running_saturated()) {
            me.yield_quiet();
        }
    }
}

impl Drop for TaskConditionVariable {
    fn drop(&mut self) {
        let waiters = std::mem::take(self.waiters.get_mut());
        wait::cancel_waiters(waiters);
    }
}
