//! Fiber stack allocation
//!
//! Every fiber runs on its own stack, allocated the first time the fiber is
//! resumed. Stacks are mmap'd with a PROT_NONE guard page below them so an
//! overflow faults instead of corrupting a neighbour, and finished stacks
//! go back to a lock-free pool for reuse.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as platform;
    } else {
        mod fallback;
        use fallback as platform;
    }
}

use attacha_core::constants::{DEFAULT_STACK_SIZE, GUARD_SIZE, MIN_STACK_SIZE};
use attacha_core::error::{MemoryError, SchedResult};
use crossbeam_queue::SegQueue;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Default number of idle stacks a pool keeps around
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// One fiber stack (guard page included)
pub struct FiberStack {
    base: NonNull<u8>,
    total: usize,
}

// Safety: the stack is plain memory owned by exactly one FiberStack
unsafe impl Send for FiberStack {}

impl FiberStack {
    /// Map a stack with `usable` bytes above the guard page
    pub fn allocate(usable: usize) -> SchedResult<Self> {
        if usable < MIN_STACK_SIZE {
            return Err(MemoryError::StackTooSmall.into());
        }
        let total = round_to_page(usable) + GUARD_SIZE;
        let base = platform::map_stack(total)?;
        Ok(Self { base, total })
    }

    /// Highest address of the stack (stacks grow down)
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // Safety: base + total is one past the mapping, a valid stack top
        unsafe { self.base.as_ptr().add(self.total) }
    }

    /// Usable bytes (guard page excluded)
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.total - GUARD_SIZE
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        platform::unmap_stack(self.base, self.total);
    }
}

#[inline]
fn round_to_page(size: usize) -> usize {
    (size + GUARD_SIZE - 1) & !(GUARD_SIZE - 1)
}

/// Pool of reusable stacks of one size
pub struct StackPool {
    free: SegQueue<FiberStack>,
    stack_size: usize,
    capacity: usize,
    allocated: AtomicUsize,
}

impl StackPool {
    pub fn new(stack_size: usize, capacity: usize) -> Self {
        Self {
            free: SegQueue::new(),
            stack_size,
            capacity,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Process-wide pool for fibers created outside any runtime (generators)
    pub fn shared_default() -> Arc<StackPool> {
        static POOL: OnceLock<Arc<StackPool>> = OnceLock::new();
        Arc::clone(POOL.get_or_init(|| Arc::new(StackPool::new(DEFAULT_STACK_SIZE, DEFAULT_POOL_CAPACITY))))
    }

    /// Take a stack from the pool or map a new one
    pub fn acquire(&self) -> SchedResult<FiberStack> {
        if let Some(stack) = self.free.pop() {
            return Ok(stack);
        }
        let stack = FiberStack::allocate(self.stack_size)?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(stack)
    }

    /// Return a stack; unmapped if the pool is already full
    pub fn release(&self, stack: FiberStack) {
        if self.free.len() < self.capacity {
            self.free.push(stack);
        } else {
            self.allocated.fetch_sub(1, Ordering::Relaxed);
            drop(stack);
        }
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Number of idle stacks
    #[inline]
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Number of live stacks (idle and in use)
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_too_small() {
        assert!(matches!(
            FiberStack::allocate(1024),
            Err(attacha_core::SchedError::MemoryError(MemoryError::StackTooSmall))
        ));
    }

    #[test]
    fn test_stack_is_writable() {
        let stack = FiberStack::allocate(MIN_STACK_SIZE).unwrap();
        assert_eq!(stack.usable_size(), MIN_STACK_SIZE);
        assert_eq!(stack.top() as usize % 16, 0);
        // Touch the whole usable range, top down
        unsafe {
            let low = stack.top().sub(stack.usable_size());
            std::ptr::write_bytes(low, 0xAB, stack.usable_size());
            assert_eq!(*stack.top().sub(1), 0xAB);
        }
    }

    #[test]
    fn test_pool_reuses_stacks() {
        let pool = StackPool::new(MIN_STACK_SIZE, 1);
        let a = pool.acquire().unwrap();
        let a_top = a.top();
        pool.release(a);
        assert_eq!(pool.idle(), 1);

        let b = pool.acquire().unwrap();
        assert_eq!(b.top(), a_top);
        let c = pool.acquire().unwrap();
        assert_eq!(pool.allocated(), 2);

        pool.release(b);
        pool.release(c); // over capacity, unmapped
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.allocated(), 1);
    }
}
