//! aarch64 (AAPCS64) context switching

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved state of a suspended context
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    /// x19..x28 at 0x00..0x50
    pub gpr: [u64; 10],
    /// x29 at 0x50
    pub fp: u64,
    /// x30 at 0x58
    pub lr: u64,
    /// sp at 0x60
    pub sp: u64,
    /// d8..d15 at 0x68..0xA8
    pub fpr: [u64; 8],
}

/// Initialize a fresh context
///
/// # Safety
///
/// `stack_top` must be the highest address of a writable stack region.
#[inline]
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let sp = (stack_top as usize) & !0xF;

    *regs = SavedRegs::default();
    regs.sp = sp as u64;
    regs.lr = fiber_trampoline as usize as u64;
    regs.gpr[0] = entry as usize as u64; // x19
    regs.gpr[1] = arg as u64; // x20
}

#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    );
}

/// Save the current context into `old` and resume `new`
///
/// # Safety
///
/// Same contract as the x86_64 variant.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (x0)
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Load from new (x1)
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}
