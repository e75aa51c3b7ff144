//! # attacha-runtime
//!
//! Scheduler, fibers and task synchronization for AttachA.
//!
//! This crate provides:
//! - Stackful fibers (architecture-specific context switch, guarded stacks)
//! - Task lifecycle, results and task-local storage
//! - Executor with admission control, worker threads and a timer thread
//! - Mutex, condition variable, semaphore, limiter and job query usable
//!   from tasks and native threads alike
//! - Prioritized event bus and pull-based generators

pub mod arch;
pub mod config;
pub mod event;
pub mod fiber;
pub mod generator;
pub mod memory;
pub mod runtime;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod timer;
pub mod tls;
pub mod wait;
pub mod worker;

// Re-exports
pub use config::{ConfigError, RuntimeConfig};
pub use event::EventSystem;
pub use generator::{Generator, GeneratorFn, Yielder};
pub use runtime::{EnterGuard, Runtime};
pub use scheduler::{Executor, ExecutorStats};
pub use sync::{
    MultiMutex, MutexUnify, NativeMutex, NativeRecursiveMutex, RelockState, TaskConditionVariable,
    TaskLimiter, TaskMutex, TaskMutexGuard, TaskQuery, TaskSemaphore,
};
pub use task::local::TaskLocal;
pub use task::{LockOwner, Task, TaskOptions};
pub use wait::WaitOutcome;

// Architecture detection
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub use arch::x86_64 as current_arch;
    } else if #[cfg(target_arch = "aarch64")] {
        pub use arch::aarch64 as current_arch;
    } else {
        compile_error!("Unsupported architecture");
    }
}
