//! Bounded-concurrency gate with self-deadlock detection
//!
//! Every holder is recorded in a lock-check list. A holder that tries to
//! enter again fails with `LimiterDeadlock` instead of waiting on itself.
//! Permits are handed to waiters directly on `unlock`, in FIFO order.
//!
//! `allow` may go negative after the maximum is lowered below the number
//! of current holders; unlocks then pay the debt before serving waiters.

use crate::task::{LockOwner, Task};
use crate::wait::{self, WaitOutcome};
use attacha_core::{SchedError, SchedResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct LimiterState {
    allow: isize,
    max: usize,
    holders: Vec<LockOwner>,
    waiters: VecDeque<Arc<Task>>,
}

impl LimiterState {
    /// Hand free permits to queued waiters
    fn hand_off(&mut self) -> Vec<Arc<Task>> {
        let mut woken = Vec::new();
        while self.allow > 0 {
            let Some(t) = self.waiters.pop_front() else { break };
            self.allow -= 1;
            self.holders.push(t.lock_owner());
            woken.push(t);
        }
        woken
    }
}

pub struct TaskLimiter {
    state: Mutex<LimiterState>,
}

impl Default for TaskLimiter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TaskLimiter {
    /// Limiter admitting `max` concurrent holders (at least one)
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            state: Mutex::new(LimiterState {
                allow: max as isize,
                max,
                holders: Vec::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn lock(&self) -> SchedResult<()> {
        self.acquire(None).map(|_| ())
    }

    pub fn try_lock(&self) -> SchedResult<bool> {
        let owner = LockOwner::current();
        let mut st = self.state.lock();
        if st.holders.contains(&owner) {
            return Err(SchedError::LimiterDeadlock);
        }
        if st.allow > 0 {
            st.allow -= 1;
            st.holders.push(owner);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn try_lock_for(&self, timeout: Duration) -> SchedResult<bool> {
        self.try_lock_until(Instant::now() + timeout)
    }

    pub fn try_lock_until(&self, deadline: Instant) -> SchedResult<bool> {
        self.acquire(Some(deadline))
    }

    fn acquire(&self, deadline: Option<Instant>) -> SchedResult<bool> {
        let owner = LockOwner::current();
        let mut st = self.state.lock();
        if st.holders.contains(&owner) {
            return Err(SchedError::LimiterDeadlock);
        }
        if st.allow > 0 {
            st.allow -= 1;
            st.holders.push(owner);
            return Ok(true);
        }
        if wait::block_on_list(st, |s| &mut s.waiters, deadline, &[])? == WaitOutcome::TimedOut {
            return Ok(false);
        }
        // The permit was handed over; give it back if we were cancelled
        if let Err(e) = Task::check_cancellation() {
            let _ = self.unlock_as(owner);
            return Err(e);
        }
        Ok(true)
    }

    pub fn unlock(&self) -> SchedResult<()> {
        self.unlock_as(LockOwner::current())
    }

    fn unlock_as(&self, owner: LockOwner) -> SchedResult<()> {
        let woken = {
            let mut st = self.state.lock();
            let Some(pos) = st.holders.iter().position(|h| *h == owner) else {
                return Err(SchedError::NotOwner);
            };
            st.holders.swap_remove(pos);
            st.allow += 1;
            st.hand_off()
        };
        for t in woken {
            t.wake();
        }
        Ok(())
    }

    /// Resize; the difference is applied to the free permits immediately
    pub fn set_max_threshold(&self, max: usize) -> SchedResult<()> {
        if max == 0 {
            return Err(SchedError::InvalidArgument("limiter maximum must be > 0"));
        }
        let woken = {
            let mut st = self.state.lock();
            st.allow += max as isize - st.max as isize;
            st.max = max;
            st.hand_off()
        };
        for t in woken {
            t.wake();
        }
        Ok(())
    }

    pub fn max_threshold(&self) -> usize {
        self.state.lock().max
    }

    /// Free permits; negative while over capacity after a shrink
    pub fn available(&self) -> isize {
        self.state.lock().allow
    }

    /// No permit left
    pub fn is_locked(&self) -> bool {
        self.state.lock().allow <= 0
    }

    /// Whether the calling context currently holds a permit
    pub fn is_holder(&self) -> bool {
        self.state.lock().holders.contains(&LockOwner::current())
    }

    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Drop for TaskLimiter {
    fn drop(&mut self) {
        let waiters = std::mem::take(&mut self.state.get_mut().waiters);
        wait::cancel_waiters(waiters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentry_is_deadlock() {
        let l = TaskLimiter::new(2);
        l.lock().unwrap();
        assert_eq!(l.lock(), Err(SchedError::LimiterDeadlock));
        assert_eq!(l.try_lock(), Err(SchedError::LimiterDeadlock));
        l.unlock().unwrap();
        assert_eq!(l.unlock(), Err(SchedError::NotOwner));
    }

    #[test]
    fn test_shrink_and_grow() {
        let l = Arc::new(TaskLimiter::new(2));
        l.lock().unwrap();
        let l2 = Arc::clone(&l);
        std::thread::spawn(move || l2.lock()).join().unwrap().unwrap();
        assert_eq!(l.available(), 0);

        l.set_max_threshold(1).unwrap();
        assert_eq!(l.available(), -1);
        l.unlock().unwrap();
        assert_eq!(l.available(), 0);
        assert!(l.is_locked());

        l.set_max_threshold(3).unwrap();
        assert_eq!(l.available(), 2);
        assert!(l.set_max_threshold(0).is_err());
    }

    #[test]
    fn test_handoff_to_native_waiter() {
        let l = Arc::new(TaskLimiter::new(1));
        l.lock().unwrap();
        let l2 = Arc::clone(&l);
        let waiter = std::thread::spawn(move || {
            l2.lock().unwrap();
            let holder = l2.is_holder();
            l2.unlock().unwrap();
            holder
        });
        std::thread::sleep(Duration::from_millis(20));
        l.unlock().unwrap();
        assert!(waiter.join().unwrap());
        assert_eq!(l.available(), 1);
    }
}
