//! Thread-local scheduler context
//!
//! A task may suspend on one worker and resume on another, so the TLS base
//! must be recomputed after every switch. Every accessor is therefore
//! `#[inline(never)]`: the compiler cannot keep a thread-local address
//! cached in a register across a context switch inside the caller.

use crate::scheduler::Executor;
use crate::task::local::TaskLocal;
use crate::task::Task;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

thread_local! {
    /// Worker index of this OS thread, usize::MAX on non-worker threads
    static WORKER_ID: Cell<usize> = const { Cell::new(usize::MAX) };

    /// Executor that new tasks on this thread are bound to
    static EXECUTOR: RefCell<Option<Arc<Executor>>> = const { RefCell::new(None) };

    /// Task whose fiber is currently executing on this thread
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };

    /// Task-local store used by native (non-task) code on this thread
    static THREAD_STORE: RefCell<Option<Arc<TaskLocal>>> = const { RefCell::new(None) };
}

#[inline(never)]
pub fn set_worker_id(id: Option<usize>) {
    WORKER_ID.with(|cell| cell.set(id.unwrap_or(usize::MAX)));
}

/// Worker index, `None` if not on a worker thread
#[inline(never)]
pub fn worker_id() -> Option<usize> {
    let id = WORKER_ID.with(|cell| cell.get());
    (id != usize::MAX).then_some(id)
}

/// Replace the current executor, returning the previous one
#[inline(never)]
pub fn replace_executor(exec: Option<Arc<Executor>>) -> Option<Arc<Executor>> {
    EXECUTOR.with(|cell| cell.replace(exec))
}

/// Executor of the running task, else the thread's entered executor
#[inline(never)]
pub fn effective_executor() -> Option<Arc<Executor>> {
    match current_task().and_then(|t| t.executor_opt()) {
        Some(exec) => Some(exec),
        None => current_executor(),
    }
}

#[inline(never)]
pub fn current_executor() -> Option<Arc<Executor>> {
    EXECUTOR.with(|cell| cell.borrow().clone())
}

#[inline(never)]
pub fn set_current_task(task: Option<Arc<Task>>) {
    attacha_core::kprint::set_task_id(task.as_ref().map_or(0, |t| t.id().as_u64()));
    // Drop the previous task outside the borrow
    let previous = CURRENT_TASK.with(|cell| cell.replace(task));
    drop(previous);
}

#[inline(never)]
pub fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

#[inline(never)]
pub fn in_task() -> bool {
    CURRENT_TASK.with(|cell| cell.borrow().is_some())
}

/// Native thread's task-local store, created on first access
#[inline(never)]
pub fn thread_store() -> Arc<TaskLocal> {
    THREAD_STORE.with(|cell| {
        Arc::clone(cell.borrow_mut().get_or_insert_with(|| Arc::new(TaskLocal::new())))
    })
}
