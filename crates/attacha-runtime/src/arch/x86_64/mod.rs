//! x86_64 (System V) context switching

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved state of a suspended context
///
/// Offsets are hard-coded in `context_switch`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub rsp: u64,   // 0x00
    pub rip: u64,   // 0x08
    pub rbx: u64,   // 0x10
    pub rbp: u64,   // 0x18
    pub r12: u64,   // 0x20
    pub r13: u64,   // 0x28
    pub r14: u64,   // 0x30
    pub r15: u64,   // 0x38
    pub mxcsr: u32, // 0x40
    pub fpucw: u32, // 0x44
}

/// Initialize a fresh context
///
/// When switched to, the context calls `entry(arg)` on the given stack.
/// `entry` must never return.
///
/// # Safety
///
/// `stack_top` must be the highest address of a writable stack region.
#[inline]
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    // The trampoline `call`s the entry, which pushes the return address and
    // leaves rsp = 16n - 8 at function entry as the ABI requires.
    let sp = (stack_top as usize) & !0xF;

    *regs = SavedRegs {
        rsp: sp as u64,
        rip: fiber_trampoline as usize as u64,
        r12: entry as usize as u64,
        r13: arg as u64,
        mxcsr: 0x1F80,
        fpucw: 0x037F,
        ..SavedRegs::default()
    };
}

#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "ud2",
    );
}

/// Save the current context into `old` and resume `new`
///
/// Returns when something switches back to `old`.
///
/// # Safety
///
/// `new` must hold a context produced by `init_context` or by a previous
/// `context_switch` that has not been resumed since.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr dword ptr [rdi + 0x40]",
        "fnstcw word ptr [rdi + 0x44]",
        // Load from new (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr dword ptr [rsi + 0x40]",
        "fldcw word ptr [rsi + 0x44]",
        "jmp rax",
        // Resume point of a saved context
        "1:",
        "ret",
    );
}
