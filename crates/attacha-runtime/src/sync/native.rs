//! OS-level locks usable through `MutexUnify`
//!
//! Both wrap `parking_lot` raw locks so ownership can be released and
//! re-acquired across a fiber suspension without a guard object.

use attacha_core::{SchedError, SchedResult};
use parking_lot::lock_api::{RawMutex as _, RawMutexTimed as _, RawReentrantMutex};
use parking_lot::{RawMutex, RawThreadId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Plain OS mutex, also usable with a timeout
pub struct NativeMutex {
    raw: RawMutex,
}

impl Default for NativeMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeMutex {
    pub const fn new() -> Self {
        Self { raw: RawMutex::INIT }
    }

    pub fn lock(&self) {
        self.raw.lock();
    }

    pub fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        self.raw.try_lock_for(timeout)
    }

    pub fn try_lock_until(&self, deadline: Instant) -> bool {
        self.raw.try_lock_until(deadline)
    }

    /// Release the lock
    ///
    /// The raw lock is not thread-bound, so only "not locked at all" can be
    /// detected here.
    pub fn unlock(&self) -> SchedResult<()> {
        if !self.raw.is_locked() {
            return Err(SchedError::NotOwner);
        }
        unsafe { self.raw.unlock() };
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

/// Recursive OS mutex with an observable hold count
///
/// Ownership is tied to the locking thread. A fiber that migrates between
/// workers must have its holds captured with `hold_count` and replayed on
/// the resuming thread, which is what relocking does.
pub struct NativeRecursiveMutex {
    raw: RawReentrantMutex<RawMutex, RawThreadId>,
    count: AtomicUsize,
}

impl Default for NativeRecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRecursiveMutex {
    pub const fn new() -> Self {
        Self {
            raw: RawReentrantMutex::INIT,
            count: AtomicUsize::new(0),
        }
    }

    pub fn lock(&self) {
        self.raw.lock();
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn try_lock(&self) -> bool {
        let ok = self.raw.try_lock();
        if ok {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        let ok = self.raw.try_lock_for(timeout);
        if ok {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    pub fn try_lock_until(&self, deadline: Instant) -> bool {
        let ok = self.raw.try_lock_until(deadline);
        if ok {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Release one hold of the calling thread
    pub fn unlock(&self) -> SchedResult<()> {
        if !self.raw.is_owned_by_current_thread() {
            return Err(SchedError::NotOwner);
        }
        self.count.fetch_sub(1, Ordering::Relaxed);
        unsafe { self.raw.unlock() };
        Ok(())
    }

    /// Holds of the calling thread, 0 if another thread (or nobody) owns it
    pub fn hold_count(&self) -> usize {
        if self.raw.is_owned_by_current_thread() {
            self.count.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_native_unlock_unlocked() {
        let m = NativeMutex::new();
        assert_eq!(m.unlock(), Err(SchedError::NotOwner));
        m.lock();
        assert!(!m.try_lock());
        assert!(!m.try_lock_for(Duration::from_millis(5)));
        m.unlock().unwrap();
        assert!(m.try_lock());
        m.unlock().unwrap();
    }

    #[test]
    fn test_recursive_hold_count() {
        let m = Arc::new(NativeRecursiveMutex::new());
        m.lock();
        m.lock();
        assert_eq!(m.hold_count(), 2);

        let m2 = Arc::clone(&m);
        let other = std::thread::spawn(move || (m2.hold_count(), m2.unlock().is_err()))
            .join()
            .unwrap();
        assert_eq!(other, (0, true));

        m.unlock().unwrap();
        m.unlock().unwrap();
        assert!(!m.is_locked());
    }
}
