//! One handle over every lock kind the runtime understands
//!
//! Condition variables and relocking only ever see a `MutexUnify`, so they
//! never need to be generic over the lock they release.
//!
//! ```text
//!   MutexUnify ──┬── None        (no lock, every operation succeeds)
//!                ├── Native      (plain and timed OS mutex)
//!                ├── Recursive   (OS recursive mutex + hold count)
//!                ├── Task        (TaskMutex, task or thread owner)
//!                └── Multi       (several of the above, in order)
//! ```

use crate::sync::mutex::TaskMutex;
use crate::sync::native::{NativeMutex, NativeRecursiveMutex};
use crate::task::LockOwner;
use attacha_core::{SchedError, SchedResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tagged reference to a lock
#[derive(Clone, Default)]
pub enum MutexUnify {
    #[default]
    None,
    Native(Arc<NativeMutex>),
    Recursive(Arc<NativeRecursiveMutex>),
    Task(Arc<TaskMutex>),
    Multi(Arc<MultiMutex>),
}

/// What `relock_begin` released, to be replayed by `relock_end`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelockState {
    /// Nothing was held
    None,
    /// One exclusive hold released
    Released,
    /// This many recursive holds released
    Recursive(usize),
    /// Per-member state of a `MultiMutex`
    Multi(Vec<RelockState>),
    /// Release failed; reported again when relocking
    Failed(SchedError),
}

impl MutexUnify {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, MutexUnify::None)
    }

    pub fn lock(&self) -> SchedResult<()> {
        match self {
            MutexUnify::None => Ok(()),
            MutexUnify::Native(m) => {
                m.lock();
                Ok(())
            }
            MutexUnify::Recursive(m) => {
                m.lock();
                Ok(())
            }
            MutexUnify::Task(m) => m.lock(),
            MutexUnify::Multi(m) => m.lock(),
        }
    }

    pub fn try_lock(&self) -> SchedResult<bool> {
        match self {
            MutexUnify::None => Ok(true),
            MutexUnify::Native(m) => Ok(m.try_lock()),
            MutexUnify::Recursive(m) => Ok(m.try_lock()),
            MutexUnify::Task(m) => Ok(m.try_lock()),
            MutexUnify::Multi(m) => m.try_lock(),
        }
    }

    pub fn try_lock_for(&self, timeout: Duration) -> SchedResult<bool> {
        self.try_lock_until(Instant::now() + timeout)
    }

    pub fn try_lock_until(&self, deadline: Instant) -> SchedResult<bool> {
        match self {
            MutexUnify::None => Ok(true),
            MutexUnify::Native(m) => Ok(m.try_lock_until(deadline)),
            MutexUnify::Recursive(m) => Ok(m.try_lock_until(deadline)),
            MutexUnify::Task(m) => m.try_lock_until(deadline),
            MutexUnify::Multi(m) => m.try_lock_until(deadline),
        }
    }

    pub fn unlock(&self) -> SchedResult<()> {
        match self {
            MutexUnify::None => Ok(()),
            MutexUnify::Native(m) => m.unlock(),
            MutexUnify::Recursive(m) => m.unlock(),
            MutexUnify::Task(m) => m.unlock(),
            MutexUnify::Multi(m) => m.unlock(),
        }
    }

    /// Release whatever `owner` holds, recording how to restore it
    ///
    /// Runs on the thread that owns OS-level holds: the worker that just
    /// switched the task out, or the blocking native thread.
    pub fn relock_begin(&self, owner: LockOwner) -> RelockState {
        match self {
            MutexUnify::None => RelockState::None,
            MutexUnify::Native(m) => match m.unlock() {
                Ok(()) => RelockState::Released,
                Err(_) => RelockState::None,
            },
            MutexUnify::Recursive(m) => {
                let holds = m.hold_count();
                for _ in 0..holds {
                    if let Err(e) = m.unlock() {
                        return RelockState::Failed(e);
                    }
                }
                RelockState::Recursive(holds)
            }
            MutexUnify::Task(m) => match m.unlock_as(owner) {
                Ok(()) => RelockState::Released,
                Err(e) => RelockState::Failed(e),
            },
            MutexUnify::Multi(m) => m.relock_begin(owner),
        }
    }

    /// Re-acquire what `relock_begin` released, on the current thread
    pub fn relock_end(&self, state: RelockState, owner: LockOwner) -> SchedResult<()> {
        match (self, state) {
            (_, RelockState::None) => Ok(()),
            (_, RelockState::Failed(e)) => Err(e),
            (MutexUnify::Native(m), RelockState::Released) => {
                m.lock();
                Ok(())
            }
            (MutexUnify::Recursive(m), RelockState::Recursive(holds)) => {
                for _ in 0..holds {
                    m.lock();
                }
                Ok(())
            }
            (MutexUnify::Task(m), RelockState::Released) => m.relock_as(owner),
            (MutexUnify::Multi(m), RelockState::Multi(states)) => m.relock_end(states, owner),
            _ => Err(SchedError::InvalidArgument("relock state does not match lock kind")),
        }
    }
}

impl From<Arc<NativeMutex>> for MutexUnify {
    fn from(m: Arc<NativeMutex>) -> Self {
        MutexUnify::Native(m)
    }
}

impl From<Arc<NativeRecursiveMutex>> for MutexUnify {
    fn from(m: Arc<NativeRecursiveMutex>) -> Self {
        MutexUnify::Recursive(m)
    }
}

impl From<Arc<TaskMutex>> for MutexUnify {
    fn from(m: Arc<TaskMutex>) -> Self {
        MutexUnify::Task(m)
    }
}

impl From<Arc<MultiMutex>> for MutexUnify {
    fn from(m: Arc<MultiMutex>) -> Self {
        MutexUnify::Multi(m)
    }
}

/// Several locks taken together, always in construction order
pub struct MultiMutex {
    locks: Vec<MutexUnify>,
}

impl MultiMutex {
    pub fn new(locks: Vec<MutexUnify>) -> Self {
        Self { locks }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn lock(&self) -> SchedResult<()> {
        for (i, l) in self.locks.iter().enumerate() {
            if let Err(e) = l.lock() {
                self.rollback(i);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn try_lock(&self) -> SchedResult<bool> {
        for (i, l) in self.locks.iter().enumerate() {
            match l.try_lock() {
                Ok(true) => {}
                Ok(false) => {
                    self.rollback(i);
                    return Ok(false);
                }
                Err(e) => {
                    self.rollback(i);
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    pub fn try_lock_until(&self, deadline: Instant) -> SchedResult<bool> {
        for (i, l) in self.locks.iter().enumerate() {
            match l.try_lock_until(deadline) {
                Ok(true) => {}
                Ok(false) => {
                    self.rollback(i);
                    return Ok(false);
                }
                Err(e) => {
                    self.rollback(i);
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    /// Release every member in reverse order, reporting the first failure
    pub fn unlock(&self) -> SchedResult<()> {
        let mut first_err = None;
        for l in self.locks.iter().rev() {
            if let Err(e) = l.unlock() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn rollback(&self, acquired: usize) {
        for l in self.locks[..acquired].iter().rev() {
            let _ = l.unlock();
        }
    }

    fn relock_begin(&self, owner: LockOwner) -> RelockState {
        let mut states: Vec<RelockState> = self
            .locks
            .iter()
            .rev()
            .map(|l| l.relock_begin(owner))
            .collect();
        states.reverse();
        RelockState::Multi(states)
    }

    fn relock_end(&self, states: Vec<RelockState>, owner: LockOwner) -> SchedResult<()> {
        let mut first_err = None;
        for (l, s) in self.locks.iter().zip(states) {
            if let Err(e) = l.relock_end(s, owner) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
