//! Counting semaphore for tasks and native threads
//!
//! A release wakes the head waiter, which then re-checks the permit count;
//! a caller arriving in between may take the permit first, in which case
//! the woken waiter queues again. A woken waiter that leaves with an error
//! passes its wake on to the next one while a permit is free.

use crate::task::Task;
use crate::wait::{self, WaitOutcome};
use attacha_core::{SchedError, SchedResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SemState {
    allow: usize,
    max: usize,
    waiters: VecDeque<Arc<Task>>,
}

pub struct TaskSemaphore {
    state: Mutex<SemState>,
}

impl Default for TaskSemaphore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TaskSemaphore {
    /// Semaphore with `max` permits, all available
    pub fn new(max: usize) -> Self {
        Self {
            state: Mutex::new(SemState {
                allow: max,
                max,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Take one permit, waiting while none is available
    pub fn lock(&self) -> SchedResult<()> {
        self.acquire(None).map(|_| ())
    }

    pub fn try_lock(&self) -> bool {
        let mut st = self.state.lock();
        if st.allow > 0 {
            st.allow -= 1;
            true
        } else {
            false
        }
    }

    pub fn try_lock_for(&self, timeout: Duration) -> SchedResult<bool> {
        self.try_lock_until(Instant::now() + timeout)
    }

    pub fn try_lock_until(&self, deadline: Instant) -> SchedResult<bool> {
        self.acquire(Some(deadline))
    }

    fn acquire(&self, deadline: Option<Instant>) -> SchedResult<bool> {
        loop {
            let mut st = self.state.lock();
            if st.allow > 0 {
                st.allow -= 1;
                return Ok(true);
            }
            let outcome = match wait::block_on_list(st, |s| &mut s.waiters, deadline, &[]) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.pass_wake();
                    return Err(e);
                }
            };
            if let Err(e) = Task::check_cancellation() {
                self.pass_wake();
                return Err(e);
            }
            if outcome == WaitOutcome::TimedOut {
                return Ok(false);
            }
        }
    }

    /// Return one permit; beyond the maximum it is dropped
    pub fn release(&self) {
        let next = {
            let mut st = self.state.lock();
            if st.allow < st.max {
                st.allow += 1;
            }
            st.waiters.pop_front()
        };
        if let Some(t) = next {
            t.wake();
        }
    }

    fn pass_wake(&self) {
        let next = {
            let mut st = self.state.lock();
            if st.allow == 0 {
                return;
            }
            st.waiters.pop_front()
        };
        if let Some(t) = next {
            t.wake();
        }
    }

    /// Reset to full capacity and wake every waiter
    pub fn release_all(&self) {
        let all = {
            let mut st = self.state.lock();
            st.allow = st.max;
            std::mem::take(&mut st.waiters)
        };
        for t in all {
            t.wake();
        }
    }

    /// Change the maximum; new permits become available immediately
    pub fn set_max(&self, max: usize) -> SchedResult<()> {
        if max == 0 {
            return Err(SchedError::InvalidArgument("semaphore maximum must be > 0"));
        }
        let woken = {
            let mut st = self.state.lock();
            if max > st.max {
                st.allow += max - st.max;
            } else {
                st.allow = st.allow.saturating_sub(st.max - max);
            }
            st.max = max;
            let n = st.allow.min(st.waiters.len());
            st.waiters.drain(..n).collect::<Vec<_>>()
        };
        for t in woken {
            t.wake();
        }
        Ok(())
    }

    pub fn max(&self) -> usize {
        self.state.lock().max
    }

    pub fn available(&self) -> usize {
        self.state.lock().allow
    }

    /// No permit left
    pub fn is_locked(&self) -> bool {
        self.state.lock().allow == 0
    }

    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Drop for TaskSemaphore {
    fn drop(&mut self) {
        let waiters = std::mem::take(&mut self.state.get_mut().waiters);
        wait::cancel_waiters(waiters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_saturates() {
        let s = TaskSemaphore::new(2);
        assert!(s.try_lock());
        assert!(s.try_lock());
        assert!(!s.try_lock());
        assert!(s.is_locked());
        s.release();
        s.release();
        s.release();
        assert_eq!(s.available(), 2);
    }

    #[test]
    fn test_timeout_and_release_all() {
        let s = Arc::new(TaskSemaphore::new(1));
        s.lock().unwrap();
        assert!(!s.try_lock_for(Duration::from_millis(10)).unwrap());

        let s2 = Arc::clone(&s);
        let waiter = std::thread::spawn(move || s2.lock());
        std::thread::sleep(Duration::from_millis(20));
        s.release_all();
        waiter.join().unwrap().unwrap();
        assert_eq!(s.available(), 0);
    }

    #[test]
    fn test_cancelled_waiter_passes_wake_on() {
        let s = Arc::new(TaskSemaphore::new(1));
        s.lock().unwrap();

        let first = Task::bridge();
        let (s2, s3) = (Arc::clone(&s), Arc::clone(&s));
        let second = std::thread::spawn(move || s2.lock());
        std::thread::sleep(Duration::from_millis(20));
        // Stand-in for a waiter that was cancelled while queued ahead
        s3.state.lock().waiters.push_front(Arc::clone(&first));

        s.release();
        assert!(first.wait_signal(Some(Instant::now())));
        s.pass_wake();
        second.join().unwrap().unwrap();
        assert_eq!(s.available(), 0);
        assert!(s.state.lock().waiters.is_empty());
    }

    #[test]
    fn test_set_max() {
        let s = TaskSemaphore::new(1);
        assert!(s.try_lock());
        s.set_max(3).unwrap();
        assert_eq!(s.available(), 2);
        s.set_max(1).unwrap();
        assert_eq!(s.available(), 0);
        assert!(s.set_max(0).is_err());
    }
}
