//! Stackful continuations
//!
//! A `Fiber` owns an entry closure, a lazily allocated stack and the saved
//! register state of both itself and whoever resumed it last. `resume` runs
//! the fiber until it suspends or finishes; code running inside the fiber
//! suspends through the `FiberHandle` it was given.
//!
//! The resumer's registers are stored in the fiber context itself, so a
//! fiber may be resumed from another fiber (a generator pulled by a task)
//! and from a different OS thread each time.

use crate::arch::{self, SavedRegs};
use crate::memory::{FiberStack, StackPool};
use attacha_core::error::{SchedError, SchedResult};
use attacha_core::kerror;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;

/// Lifecycle of a fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Never resumed, no stack yet
    Fresh,
    /// Executing on some thread
    Running,
    /// Switched out, waiting for `resume`
    Suspended,
    /// Entry closure returned
    Finished,
}

type Entry = Box<dyn FnOnce(FiberHandle) + Send>;

struct FiberContext {
    regs: SavedRegs,
    caller: SavedRegs,
    entry: Option<Entry>,
    state: FiberState,
}

/// A stackful continuation
pub struct Fiber {
    ctx: Box<FiberContext>,
    stack: Option<FiberStack>,
    pool: Arc<StackPool>,
}

// Safety: the context is only touched by the thread currently resuming or
// running the fiber, and the entry closure is Send.
unsafe impl Send for Fiber {}

impl Fiber {
    /// Create a fiber that will run `entry` on a stack taken from `pool`
    pub fn new<F>(pool: Arc<StackPool>, entry: F) -> Self
    where
        F: FnOnce(FiberHandle) + Send + 'static,
    {
        Self {
            ctx: Box::new(FiberContext {
                regs: SavedRegs::default(),
                caller: SavedRegs::default(),
                entry: Some(Box::new(entry)),
                state: FiberState::Fresh,
            }),
            stack: None,
            pool,
        }
    }

    /// Handle used by code inside the fiber to suspend it
    #[inline]
    pub fn handle(&self) -> FiberHandle {
        FiberHandle(NonNull::from(&*self.ctx))
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        self.ctx.state
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.ctx.state == FiberState::Finished
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.ctx.state != FiberState::Fresh
    }

    /// Run the fiber until it suspends or finishes
    ///
    /// The first call maps the stack; a mapping failure is returned and the
    /// fiber stays `Fresh`.
    pub fn resume(&mut self) -> SchedResult<FiberState> {
        match self.ctx.state {
            FiberState::Finished => return Ok(FiberState::Finished),
            FiberState::Running => {
                return Err(SchedError::EnvironmentMisuse("fiber resumed while running"));
            }
            FiberState::Fresh => {
                let stack = self.pool.acquire()?;
                let arg = &mut *self.ctx as *mut FiberContext as usize;
                unsafe {
                    arch::init_context(&mut self.ctx.regs, stack.top(), fiber_entry, arg);
                }
                self.stack = Some(stack);
            }
            FiberState::Suspended => {}
        }

        self.ctx.state = FiberState::Running;
        let ctx: *mut FiberContext = &mut *self.ctx;
        unsafe {
            arch::context_switch(&mut (*ctx).caller, &(*ctx).regs);
        }

        let state = self.ctx.state;
        if state == FiberState::Finished {
            if let Some(stack) = self.stack.take() {
                self.pool.release(stack);
            }
        }
        Ok(state)
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        // A suspended fiber's frames are abandoned without unwinding; owners
        // that need cleanup resume it to completion first.
        if let Some(stack) = self.stack.take() {
            self.pool.release(stack);
        }
    }
}

/// Non-owning reference to a fiber, valid while the fiber is alive
#[derive(Clone, Copy)]
pub struct FiberHandle(NonNull<FiberContext>);

// Safety: the handle is only dereferenced by code running inside the fiber
unsafe impl Send for FiberHandle {}
unsafe impl Sync for FiberHandle {}

impl FiberHandle {
    /// Switch from the fiber back to whoever resumed it
    ///
    /// Returns when the fiber is resumed again, possibly on another thread.
    ///
    /// # Safety
    ///
    /// Must be called from code running on this fiber's own stack.
    #[inline(never)]
    pub unsafe fn suspend(self) {
        let ctx = self.0.as_ptr();
        debug_assert_eq!((*ctx).state, FiberState::Running);
        (*ctx).state = FiberState::Suspended;
        arch::context_switch(&mut (*ctx).regs, &(*ctx).caller);
    }
}

unsafe extern "C" fn fiber_entry(arg: usize) -> ! {
    let ctx = arg as *mut FiberContext;
    let handle = FiberHandle(NonNull::new_unchecked(ctx));

    if let Some(entry) = (*ctx).entry.take() {
        // Unwinding into the trampoline is undefined; owners catch their
        // own panics, anything left here is a bug.
        if panic::catch_unwind(AssertUnwindSafe(|| entry(handle))).is_err() {
            kerror!("panic escaped a fiber entry");
            std::process::abort();
        }
    }

    (*ctx).state = FiberState::Finished;
    arch::context_switch(&mut (*ctx).regs, &(*ctx).caller);

    kerror!("finished fiber was resumed");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use attacha_core::constants::MIN_STACK_SIZE;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool() -> Arc<StackPool> {
        Arc::new(StackPool::new(MIN_STACK_SIZE, 4))
    }

    #[test]
    fn test_run_to_completion() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let mut fiber = Fiber::new(pool(), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fiber.state(), FiberState::Fresh);
        assert_eq!(fiber.resume().unwrap(), FiberState::Finished);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // Resuming a finished fiber is a no-op
        assert_eq!(fiber.resume().unwrap(), FiberState::Finished);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_suspend_and_resume() {
        let steps = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&steps);
        let mut fiber = Fiber::new(pool(), move |handle| {
            for _ in 0..3 {
                s.fetch_add(1, Ordering::SeqCst);
                unsafe { handle.suspend() };
            }
        });
        for expected in 1..=3 {
            assert_eq!(fiber.resume().unwrap(), FiberState::Suspended);
            assert_eq!(steps.load(Ordering::SeqCst), expected);
        }
        assert_eq!(fiber.resume().unwrap(), FiberState::Finished);
    }

    #[test]
    fn test_resume_from_another_thread() {
        let mut fiber = Fiber::new(pool(), move |handle| {
            let first = std::thread::current().id();
            unsafe { handle.suspend() };
            let second = std::thread::current().id();
            assert_ne!(first, second);
        });
        assert_eq!(fiber.resume().unwrap(), FiberState::Suspended);
        let state = std::thread::spawn(move || fiber.resume().unwrap()).join().unwrap();
        assert_eq!(state, FiberState::Finished);
    }

    #[test]
    fn test_nested_fibers() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        let p = pool();
        let inner_pool = Arc::clone(&p);
        let mut outer = Fiber::new(p, move |outer_handle| {
            let o2 = Arc::clone(&o);
            let mut inner = Fiber::new(inner_pool, move |inner_handle| {
                o2.lock().push("inner-1");
                unsafe { inner_handle.suspend() };
                o2.lock().push("inner-2");
            });
            inner.resume().unwrap();
            o.lock().push("outer-1");
            unsafe { outer_handle.suspend() };
            inner.resume().unwrap();
            o.lock().push("outer-2");
        });
        assert_eq!(outer.resume().unwrap(), FiberState::Suspended);
        assert_eq!(outer.resume().unwrap(), FiberState::Finished);
        assert_eq!(*order.lock(), vec!["inner-1", "outer-1", "inner-2", "outer-2"]);
    }

    #[test]
    fn test_stack_returns_to_pool() {
        let p = pool();
        let mut fiber = Fiber::new(Arc::clone(&p), |_| {});
        fiber.resume().unwrap();
        assert_eq!(p.idle(), 1);
    }
}
