//! Task-aware synchronization primitives
//!
//! Every primitive serves tasks and native threads alike through the shared
//! wait path in `crate::wait`: tasks suspend their fiber, native threads
//! block on a bridge task's signal.

pub mod condvar;
pub mod limiter;
pub mod mutex;
pub mod native;
pub mod query;
pub mod semaphore;
pub mod unify;

pub use condvar::TaskConditionVariable;
pub use limiter::TaskLimiter;
pub use mutex::{TaskMutex, TaskMutexGuard};
pub use native::{NativeMutex, NativeRecursiveMutex};
pub use query::TaskQuery;
pub use semaphore::TaskSemaphore;
pub use unify::{MultiMutex, MutexUnify, RelockState};
