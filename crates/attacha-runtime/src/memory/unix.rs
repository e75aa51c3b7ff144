//! Unix stack mapping using mmap + mprotect

use attacha_core::constants::GUARD_SIZE;
use attacha_core::error::{MemoryError, SchedResult};
use std::ptr::NonNull;

/// Map `total` bytes and turn the lowest page into a guard
pub(super) fn map_stack(total: usize) -> SchedResult<NonNull<u8>> {
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            total,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | MAP_STACK_FLAGS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(MemoryError::AllocationFailed.into());
    }

    // Stack grows down: the guard sits at the low end
    let ret = unsafe { libc::mprotect(base, GUARD_SIZE, libc::PROT_NONE) };
    if ret != 0 {
        unsafe {
            libc::munmap(base, total);
        }
        return Err(MemoryError::ProtectionFailed.into());
    }

    NonNull::new(base as *mut u8).ok_or_else(|| MemoryError::AllocationFailed.into())
}

pub(super) fn unmap_stack(base: NonNull<u8>, total: usize) {
    unsafe {
        libc::munmap(base.as_ptr() as *mut libc::c_void, total);
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_STACK_FLAGS: libc::c_int = libc::MAP_NORESERVE | libc::MAP_STACK;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_STACK_FLAGS: libc::c_int = 0;
