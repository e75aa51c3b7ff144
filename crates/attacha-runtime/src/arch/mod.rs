//! Architecture-specific context switching
//!
//! Each backend provides the same three items:
//!
//! - `SavedRegs` - callee-saved register file of a suspended context
//! - `init_context` - prepare a fresh context that starts in an entry function
//! - `context_switch` - save the current context and load another one

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{context_switch, init_context, SavedRegs};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{context_switch, init_context, SavedRegs};
    } else {
        compile_error!("Unsupported architecture");
    }
}

/// Signature of the function a fresh context starts in
pub type EntryFn = unsafe extern "C" fn(usize) -> !;
