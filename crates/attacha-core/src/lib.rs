//! # attacha-core
//!
//! Core types shared by the AttachA task runtime.
//!
//! This crate is platform-agnostic and contains no scheduling code.
//! Everything that switches stacks or parks threads lives in
//! `attacha-runtime`.
//!
//! ## Modules
//!
//! - `id` - Task identifier type
//! - `state` - Task state and event priority enums
//! - `error` - Error taxonomy shared by every primitive
//! - `value` - Minimal value container passed to and returned from tasks
//! - `function` - Callable abstraction the runtime executes
//! - `spinlock` - Internal spinlock primitive
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod value;
pub mod function;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::TaskId;
pub use state::{TaskState, Priority};
pub use error::{SchedError, SchedResult, MemoryError, WorkerError, Exception};
pub use value::{Value, Args};
pub use function::{Callable, ClosureFn, FunctionEnvironment, NativeFn};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use kprint::LogLevel;
pub use env::{env_get, env_get_bool, env_get_duration_ms, env_get_opt, env_get_str, env_is_set};

/// Constants shared by the runtime
pub mod constants {
    /// Default fiber stack size (1 MiB)
    pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

    /// Smallest stack a fiber may be given
    pub const MIN_STACK_SIZE: usize = 64 * 1024;

    /// Guard page size (4 KB)
    pub const GUARD_SIZE: usize = 4096;

    /// Maximum workers (OS threads)
    pub const MAX_WORKERS: usize = 256;

    /// Number of locks a task may release and re-acquire across one suspension
    pub const MAX_RELOCKS: usize = 3;

    /// Number of event priority tiers
    pub const PRIORITY_TIERS: usize = 5;
}
