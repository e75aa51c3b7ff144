//! # attacha - Cooperative task runtime
//!
//! M:N userspace tasks on stackful fibers, with synchronization primitives
//! that behave the same whether the caller is a task or a plain OS thread.
//!
//! ## Features
//!
//! - **Tasks**: start, await results, intermediate results, yield mode,
//!   exception handlers, cooperative cancellation, deadlines
//! - **Admission control**: bound on running tasks (excess waits in a cold
//!   queue) and backpressure on task construction
//! - **Synchronization**: mutex, condition variable, semaphore, limiter with
//!   self-deadlock detection, bounded job query
//! - **Relocking**: suspend while releasing up to three locks, re-acquire
//!   them in order on resume
//! - **Events**: five priority tiers of sync and async listeners
//! - **Generators**: pull-based coroutines on their own fiber
//!
//! ## Quick Start
//!
//! ```ignore
//! use attacha::{Runtime, RuntimeConfig, TaskMutex, Value};
//! use std::sync::Arc;
//!
//! fn main() -> attacha::SchedResult<()> {
//!     let rt = Runtime::new(RuntimeConfig::from_env())?;
//!     rt.start()?;
//!
//!     let lock = Arc::new(TaskMutex::new());
//!     let l = Arc::clone(&lock);
//!     let task = rt.spawn(move |_| {
//!         let _g = l.lock_guard()?;
//!         attacha::sleep_ms(10)?;
//!         Ok(Value::str("done"))
//!     })?;
//!
//!     // Native threads wait on the same primitives
//!     let _g = lock.lock_guard()?;
//!     println!("{:?}", task.get_result(0)?);
//!     rt.shutdown()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │      Task, TaskMutex, TaskConditionVariable, EventSystem    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Wait path (wait.rs)                         │
//! │   task: suspend fiber + relocks │ native: bridge + condvar  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Executor                              │
//! │      ready queue, cold queue, running / planned limits      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │      │  Worker   │      │   Timer   │
//!    │  Thread   │      │  Thread   │      │   Thread  │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │
//!          └─────────┬─────────┘
//!                    ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                    Fibers                               │
//!    │      guarded mmap stacks, pooled; asm context switch    │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use attacha_core::{
    Args, Callable, Exception, FunctionEnvironment, MemoryError, Priority, SchedError, SchedResult,
    TaskId, TaskState, Value, WorkerError,
};

// Re-export kprint macros for debug logging
pub use attacha_core::{kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};
pub use attacha_core::kprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export env utilities
pub use attacha_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use attacha_runtime::{
    EnterGuard, EventSystem, Executor, ExecutorStats, Generator, GeneratorFn, LockOwner, MultiMutex,
    MutexUnify, NativeMutex, NativeRecursiveMutex, RelockState, Runtime, RuntimeConfig, Task,
    TaskConditionVariable, TaskLimiter, TaskLocal, TaskMutex, TaskMutexGuard, TaskOptions,
    TaskQuery, TaskSemaphore, WaitOutcome, Yielder,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Create and start a task on the current runtime
///
/// The current runtime is the one running the calling task, or the one
/// entered on this native thread with `Runtime::enter`. Outside both this
/// fails with `NotInitialized`.
///
/// # Example
///
/// ```ignore
/// let t = attacha::spawn(|args| Ok(Value::Int(args.len() as i64)))?;
/// assert_eq!(t.get_result(0)?, Value::Int(0));
/// ```
pub fn spawn<F>(f: F) -> SchedResult<Arc<Task>>
where
    F: Fn(Args) -> SchedResult<Value> + Send + Sync + 'static,
{
    spawn_with(Callable::from_fn(f), Vec::new(), TaskOptions::new())
}

/// Create and start a task with explicit arguments and options
pub fn spawn_with(func: Callable, args: Args, opts: TaskOptions) -> SchedResult<Arc<Task>> {
    let task = Task::with_options(func, args, opts)?;
    task.start()?;
    Ok(task)
}

/// Give other tasks a turn
///
/// Outside a task this yields the OS thread.
#[inline]
pub fn yield_now() -> SchedResult<()> {
    Task::yield_now()
}

/// Suspend the calling task (or sleep the thread) for `duration`
#[inline]
pub fn sleep(duration: Duration) -> SchedResult<()> {
    Task::sleep(duration)
}

#[inline]
pub fn sleep_ms(ms: u64) -> SchedResult<()> {
    Task::sleep(Duration::from_millis(ms))
}

#[inline]
pub fn sleep_until(wake_at: Instant) -> SchedResult<()> {
    Task::sleep_until(wake_at)
}

/// Publish an intermediate result of the calling task
#[inline]
pub fn result(value: Value) -> SchedResult<()> {
    Task::result(value)
}

/// `Err(Cancelled)` once the calling task was asked to stop
#[inline]
pub fn check_cancellation() -> SchedResult<()> {
    Task::check_cancellation()
}

#[inline]
pub fn self_cancel() -> SchedResult<()> {
    Task::self_cancel()
}

/// Task-local store of the calling task, or the thread's store
#[inline]
pub fn task_local() -> Arc<TaskLocal> {
    Task::task_local()
}

#[inline]
pub fn current_task() -> Option<Arc<Task>> {
    Task::current()
}

/// Check if currently executing within a task
#[inline]
pub fn is_in_task() -> bool {
    Task::is_task()
}
