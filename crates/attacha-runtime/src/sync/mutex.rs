//! Task-aware exclusive lock
//!
//! The holder is a task id or a native thread id, so a task keeps the lock
//! when it migrates between workers. Contended callers queue FIFO; `unlock`
//! hands ownership straight to the head of the queue before waking it, so
//! a newcomer can never barge in between.

use crate::task::{LockOwner, Task};
use crate::wait::{self, WaitOutcome};
use attacha_core::{SchedError, SchedResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct MutexState {
    owner: Option<LockOwner>,
    waiters: VecDeque<Arc<Task>>,
}

#[derive(Default)]
pub struct TaskMutex {
    state: Mutex<MutexState>,
}

impl TaskMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, suspending (or blocking) while it is held
    ///
    /// Re-locking by the holder fails with `AlreadyLocked`. If the calling
    /// task is cancelled while queued, the handed-over lock is released
    /// again and `Cancelled` is returned.
    pub fn lock(&self) -> SchedResult<()> {
        self.acquire(LockOwner::current(), None, true).map(|_| ())
    }

    pub fn try_lock(&self) -> bool {
        let mut st = self.state.lock();
        if st.owner.is_some() {
            return false;
        }
        st.owner = Some(LockOwner::current());
        true
    }

    pub fn try_lock_for(&self, timeout: Duration) -> SchedResult<bool> {
        self.try_lock_until(Instant::now() + timeout)
    }

    /// Acquire before `deadline`; false (and no longer queued) on timeout
    pub fn try_lock_until(&self, deadline: Instant) -> SchedResult<bool> {
        self.acquire(LockOwner::current(), Some(deadline), true)
    }

    pub fn unlock(&self) -> SchedResult<()> {
        self.unlock_as(LockOwner::current())
    }

    /// Release on behalf of `owner`, handing the lock to the next waiter
    pub(crate) fn unlock_as(&self, owner: LockOwner) -> SchedResult<()> {
        let next = {
            let mut st = self.state.lock();
            if st.owner != Some(owner) {
                return Err(SchedError::NotOwner);
            }
            let next = st.waiters.pop_front();
            st.owner = next.as_ref().map(|t| t.lock_owner());
            next
        };
        if let Some(t) = next {
            t.wake();
        }
        Ok(())
    }

    /// Re-acquire after a suspension; no cancellation checkpoint
    pub(crate) fn relock_as(&self, owner: LockOwner) -> SchedResult<()> {
        self.acquire(owner, None, false).map(|_| ())
    }

    fn acquire(&self, owner: LockOwner, deadline: Option<Instant>, checkpoint: bool) -> SchedResult<bool> {
        let mut st = self.state.lock();
        if st.owner == Some(owner) {
            return Err(SchedError::AlreadyLocked);
        }
        if st.owner.is_none() {
            st.owner = Some(owner);
            drop(st);
        } else if wait::block_on_list(st, |s| &mut s.waiters, deadline, &[])? == WaitOutcome::TimedOut {
            return Ok(false);
        }

        if checkpoint {
            if let Err(e) = Task::check_cancellation() {
                let _ = self.unlock_as(owner);
                return Err(e);
            }
        }
        Ok(true)
    }

    /// Lock and return a guard that unlocks on drop
    pub fn lock_guard(&self) -> SchedResult<TaskMutexGuard<'_>> {
        let owner = LockOwner::current();
        self.acquire(owner, None, true)?;
        Ok(TaskMutexGuard { mutex: self, owner })
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Whether the calling context holds the lock
    pub fn is_own(&self) -> bool {
        self.state.lock().owner == Some(LockOwner::current())
    }

    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Drop for TaskMutex {
    fn drop(&mut self) {
        let waiters = std::mem::take(&mut self.state.get_mut().waiters);
        wait::cancel_waiters(waiters);
    }
}

/// RAII guard for `TaskMutex`
pub struct TaskMutexGuard<'a> {
    mutex: &'a TaskMutex,
    owner: LockOwner,
}

impl Drop for TaskMutexGuard<'_> {
    fn drop(&mut self) {
        let _ = self.mutex.unlock_as(self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock_errors() {
        let m = TaskMutex::new();
        assert_eq!(m.unlock(), Err(SchedError::NotOwner));
        m.lock().unwrap();
        assert!(m.is_own());
        assert_eq!(m.lock(), Err(SchedError::AlreadyLocked));
        assert!(!m.try_lock());
        m.unlock().unwrap();
        assert!(!m.is_locked());
    }

    #[test]
    fn test_guard_releases() {
        let m = TaskMutex::new();
        {
            let _g = m.lock_guard().unwrap();
            assert!(m.is_locked());
        }
        assert!(!m.is_locked());
    }

    #[test]
    fn test_native_handoff_and_timeout() {
        let m = Arc::new(TaskMutex::new());
        m.lock().unwrap();

        let m2 = Arc::clone(&m);
        let timed = std::thread::spawn(move || m2.try_lock_for(Duration::from_millis(20)).unwrap());
        assert!(!timed.join().unwrap());
        assert_eq!(m.waiters(), 0);

        let m3 = Arc::clone(&m);
        let waiter = std::thread::spawn(move || {
            m3.lock().unwrap();
            let own = m3.is_own();
            m3.unlock().unwrap();
            own
        });
        while m.waiters() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        m.unlock().unwrap();
        assert!(waiter.join().unwrap());
        assert!(!m.is_locked());
    }
}
