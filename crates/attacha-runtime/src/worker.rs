//! Worker thread management
//!
//! Workers are OS threads that pull tasks from their executor and run them
//! on fibers. A task is not pinned: each resume may happen on a different
//! worker.

use crate::fiber::FiberState;
use crate::scheduler::Executor;
use crate::task::{SuspendReason, Task};
use crate::tls;
use attacha_core::{kdebug, kerror, kprint, SchedResult, TaskState, Value, WorkerError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Pool of worker threads
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawn `num_workers` threads running `executor`
    ///
    /// On a spawn failure the already started threads keep running until
    /// the executor shuts down.
    pub fn start(executor: &Arc<Executor>, num_workers: usize) -> SchedResult<Self> {
        let mut handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let exec = Arc::clone(executor);
            let handle = thread::Builder::new()
                .name(format!("attacha-worker-{}", i))
                .spawn(move || worker_main_loop(exec, i))
                .map_err(|_| WorkerError::SpawnFailed)?;
            handles.push(handle);
        }
        Ok(Self { handles, num_workers })
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Wait for every worker to exit
    ///
    /// A worker cannot join itself, so when called from one of the pool's
    /// own threads that handle is skipped.
    pub fn join(self) -> SchedResult<()> {
        let me = thread::current().id();
        let mut panicked = false;
        for handle in self.handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                panicked = true;
            }
        }
        if panicked {
            return Err(WorkerError::Panicked.into());
        }
        Ok(())
    }
}

fn worker_main_loop(exec: Arc<Executor>, worker_id: usize) {
    tls::set_worker_id(Some(worker_id));
    kprint::set_worker_id(Some(worker_id));
    tls::replace_executor(Some(Arc::clone(&exec)));
    if exec.config().debug_logging {
        kdebug!("worker {} started", worker_id);
    }

    while let Some(task) = exec.next_task() {
        run_task(&exec, task);
    }

    tls::replace_executor(None);
    tls::set_worker_id(None);
    kprint::set_worker_id(None);
    if exec.config().debug_logging {
        kdebug!("worker {} exiting", worker_id);
    }
}

/// Resume `task` once and handle the outcome
fn run_task(exec: &Arc<Executor>, task: Arc<Task>) {
    let mut slot = task.fiber_slot().lock();

    if task.is_ended() {
        drop(slot);
        exec.complete(&task);
        return;
    }

    if slot.is_none() {
        // Cancelled before it ever ran: complete without running the body
        if task.cancellation_requested() {
            drop(slot);
            task.finish(None);
            exec.complete(&task);
            return;
        }
        *slot = Some(task.make_fiber(exec));
    }
    let Some(fiber) = slot.as_mut() else {
        return;
    };

    task.set_state(TaskState::Running);
    tls::set_current_task(Some(Arc::clone(&task)));
    let outcome = fiber.resume();
    tls::set_current_task(None);

    match outcome {
        Ok(FiberState::Finished) => {
            *slot = None;
            drop(slot);
            exec.complete(&task);
        }
        Ok(_) => {
            task.set_state(TaskState::Suspended);
            task.release_relocks();
            match task.take_suspend_reason() {
                SuspendReason::Yield => {
                    drop(slot);
                    task.wake();
                }
                SuspendReason::Wait => {
                    exec.park(&task);
                    drop(slot);
                }
            }
        }
        Err(e) => {
            kerror!("task {} could not be resumed: {}", task.id(), e);
            *slot = None;
            drop(slot);
            task.finish(Some(Value::exception(e)));
            exec.complete(&task);
        }
    }
}
