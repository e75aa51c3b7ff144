//! The one suspend/wake path shared by every primitive
//!
//! A caller holding a primitive's internal lock publishes itself in one of
//! the primitive's wait lists and goes to sleep:
//!
//! - a task publishes its own `Arc<Task>` and switches its fiber out
//! - a native thread publishes a bridge task and blocks on its signal
//!
//! Wakers pop the head of the list under the same lock and call
//! `Task::wake`, which works for both kinds. A timed wait that finds itself
//! still in the list after waking has timed out; if it was already popped,
//! the wake won the race and the wait counts as notified.

use crate::sync::unify::{MutexUnify, RelockState};
use crate::task::{LockOwner, SuspendReason, Task};
use crate::tls;
use attacha_core::{SchedError, SchedResult};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Popped from the wait list by a waker
    Notified,
    /// Deadline passed while still queued
    TimedOut,
}

pub(crate) type WaitList<T> = fn(&mut T) -> &mut VecDeque<Arc<Task>>;

/// Wait on `list(&mut *guard)` until popped or until `deadline`
///
/// Consumes the guard: it is released only after the caller is queued, so
/// a waker holding the same lock cannot miss it. `relocks` are released
/// after the caller is queued and re-acquired before returning.
///
/// No cancellation checkpoint is taken here; callers that own state handed
/// to them on wake must settle it first. A native waiter whose bridge was
/// cancelled (primitive dropped) gets `Cancelled`.
pub(crate) fn block_on_list<T>(
    mut guard: MutexGuard<'_, T>,
    list: WaitList<T>,
    deadline: Option<Instant>,
    relocks: &[MutexUnify],
) -> SchedResult<WaitOutcome> {
    if deadline.is_some_and(|d| d <= Instant::now()) {
        return Ok(WaitOutcome::TimedOut);
    }

    match tls::current_task() {
        Some(me) => {
            let exec = me.executor_opt().ok_or(SchedError::NotInitialized)?;
            let epoch = me.prepare_suspend();
            list(&mut *guard).push_back(Arc::clone(&me));
            if let Some(d) = deadline {
                exec.timer().register(Arc::clone(&me), d, epoch);
            }
            me.set_relocks(relocks);
            let mutex = MutexGuard::mutex(&guard);
            drop(guard);

            me.switch_out(SuspendReason::Wait)?;

            Ok(match deadline {
                Some(_) => settle_timed(mutex, list, &me),
                None => WaitOutcome::Notified,
            })
        }
        None => {
            let bridge = Task::bridge();
            list(&mut *guard).push_back(Arc::clone(&bridge));
            let mutex = MutexGuard::mutex(&guard);
            drop(guard);

            let owner = LockOwner::current();
            let states: Vec<RelockState> = relocks.iter().map(|l| l.relock_begin(owner)).collect();

            let outcome = if bridge.wait_signal(deadline) {
                WaitOutcome::Notified
            } else {
                settle_timed(mutex, list, &bridge)
            };

            let mut first_err = None;
            for (lock, state) in relocks.iter().zip(states) {
                if let Err(e) = lock.relock_end(state, owner) {
                    first_err.get_or_insert(e);
                }
            }
            if let Some(e) = first_err {
                return Err(e);
            }
            if bridge.is_cancelled() {
                return Err(SchedError::Cancelled);
            }
            Ok(outcome)
        }
    }
}

/// Remove `waiter` if it is still queued: present means timed out
fn settle_timed<T>(mutex: &Mutex<T>, list: WaitList<T>, waiter: &Arc<Task>) -> WaitOutcome {
    let mut guard = mutex.lock();
    let queue = list(&mut *guard);
    match queue.iter().position(|t| Arc::ptr_eq(t, waiter)) {
        Some(pos) => {
            queue.remove(pos);
            WaitOutcome::TimedOut
        }
        None => WaitOutcome::Notified,
    }
}

/// Cancel and wake every waiter of a primitive being dropped
pub(crate) fn cancel_waiters(waiters: impl IntoIterator<Item = Arc<Task>>) {
    for w in waiters {
        w.cancel();
        w.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Waiters {
        list: VecDeque<Arc<Task>>,
    }

    fn list(w: &mut Waiters) -> &mut VecDeque<Arc<Task>> {
        &mut w.list
    }

    #[test]
    fn test_native_wait_notified() {
        let m = Arc::new(Mutex::new(Waiters { list: VecDeque::new() }));
        let m2 = Arc::clone(&m);
        let waker = std::thread::spawn(move || loop {
            if let Some(t) = m2.lock().list.pop_front() {
                t.wake();
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        });
        let outcome = block_on_list(m.lock(), list, None, &[]).unwrap();
        assert_eq!(outcome, WaitOutcome::Notified);
        waker.join().unwrap();
    }

    #[test]
    fn test_native_wait_times_out_and_leaves_list() {
        let m = Mutex::new(Waiters { list: VecDeque::new() });
        let deadline = Instant::now() + Duration::from_millis(20);
        let outcome = block_on_list(m.lock(), list, Some(deadline), &[]).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(Instant::now() >= deadline);
        assert!(m.lock().list.is_empty());
    }

    #[test]
    fn test_past_deadline_returns_immediately() {
        let m = Mutex::new(Waiters { list: VecDeque::new() });
        let outcome = block_on_list(m.lock(), list, Some(Instant::now()), &[]).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(m.lock().list.is_empty());
    }

    #[test]
    fn test_cancelled_waiter_reports_cancel() {
        let m = Arc::new(Mutex::new(Waiters { list: VecDeque::new() }));
        let m2 = Arc::clone(&m);
        let dropper = std::thread::spawn(move || loop {
            let drained: Vec<_> = m2.lock().list.drain(..).collect();
            if !drained.is_empty() {
                cancel_waiters(drained);
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        });
        let err = block_on_list(m.lock(), list, None, &[]).unwrap_err();
        assert_eq!(err, SchedError::Cancelled);
        dropper.join().unwrap();
    }
}
