//! Heap-backed stacks for platforms without mmap (no guard page)

use attacha_core::error::{MemoryError, SchedResult};
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

const STACK_ALIGN: usize = 16;

pub(super) fn map_stack(total: usize) -> SchedResult<NonNull<u8>> {
    let layout = Layout::from_size_align(total, STACK_ALIGN).map_err(|_| MemoryError::AllocationFailed)?;
    // Safety: layout has non-zero size
    NonNull::new(unsafe { alloc(layout) }).ok_or_else(|| MemoryError::AllocationFailed.into())
}

pub(super) fn unmap_stack(base: NonNull<u8>, total: usize) {
    if let Ok(layout) = Layout::from_size_align(total, STACK_ALIGN) {
        unsafe { dealloc(base.as_ptr(), layout) };
    }
}
