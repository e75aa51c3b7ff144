//! Explicit scheduler context
//!
//! A `Runtime` owns one executor, its timer thread and its worker pool.
//! There is no process-wide scheduler: worker threads see their runtime
//! through thread-local state, native threads opt in with `enter`.
//!
//! ```rust,ignore
//! let rt = Runtime::new(RuntimeConfig::from_env().num_workers(4))?;
//! rt.start()?;
//! let v = rt.block_on(|_| Ok(Value::Int(42)))?;
//! rt.shutdown()?;
//! ```

use crate::config::RuntimeConfig;
use crate::scheduler::{Executor, ExecutorStats};
use crate::task::Task;
use crate::tls;
use crate::worker::WorkerPool;
use attacha_core::kprint::{self, LogLevel};
use attacha_core::{kdebug, kinfo, kwarn, Args, Callable, SchedError, SchedResult, Value};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Runtime {
    executor: Arc<Executor>,
    workers: Mutex<Option<WorkerPool>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

/// Makes a runtime current on this thread until dropped
///
/// Tasks created while the guard lives bind to that runtime's executor.
pub struct EnterGuard {
    previous: Option<Arc<Executor>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        tls::replace_executor(self.previous.take());
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> SchedResult<Self> {
        config.validate()?;
        if config.debug_logging {
            kprint::set_log_level(LogLevel::Debug);
        }
        Ok(Self {
            executor: Executor::new(config),
            workers: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Runtime configured from `ATTACHA_*` environment variables
    pub fn from_env() -> SchedResult<Self> {
        Self::new(RuntimeConfig::from_env())
    }

    /// Start the timer thread and the workers
    pub fn start(&self) -> SchedResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedError::AlreadyInitialized);
        }
        let config = self.executor.config();
        self.executor.timer().start()?;
        let pool = match WorkerPool::start(&self.executor, config.num_workers) {
            Ok(pool) => pool,
            Err(e) => {
                self.executor.begin_shutdown();
                self.executor.timer().stop();
                return Err(e);
            }
        };
        kinfo!("runtime started with {} workers", pool.num_workers());
        *self.workers.lock() = Some(pool);
        Ok(())
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    pub fn enter(&self) -> EnterGuard {
        EnterGuard {
            previous: tls::replace_executor(Some(Arc::clone(&self.executor))),
            _not_send: PhantomData,
        }
    }

    /// Create and start a task on this runtime
    pub fn spawn<F>(&self, f: F) -> SchedResult<Arc<Task>>
    where
        F: Fn(Args) -> SchedResult<Value> + Send + Sync + 'static,
    {
        self.spawn_callable(Callable::from_fn(f), Vec::new())
    }

    pub fn spawn_callable(&self, func: Callable, args: Args) -> SchedResult<Arc<Task>> {
        let _enter = self.enter();
        let task = Task::new(func, args)?;
        task.start()?;
        Ok(task)
    }

    /// Run `f` as a task and block the calling thread until it ends
    ///
    /// Returns the task's first result; an exception it ended with comes
    /// back as the error.
    pub fn block_on<F>(&self, f: F) -> SchedResult<Value>
    where
        F: Fn(Args) -> SchedResult<Value> + Send + Sync + 'static,
    {
        if tls::in_task() {
            return Err(SchedError::EnvironmentMisuse("block_on inside a task"));
        }
        let task = self.spawn(f)?;
        task.get_result(0)?.into_result()
    }

    #[inline]
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.executor.config()
    }

    pub fn max_running_tasks(&self) -> usize {
        self.executor.max_running_tasks()
    }

    pub fn set_max_running_tasks(&self, max: usize) {
        self.executor.set_max_running_tasks(max);
    }

    pub fn max_planned_tasks(&self) -> usize {
        self.executor.max_planned_tasks()
    }

    pub fn set_max_planned_tasks(&self, max: usize) {
        self.executor.set_max_planned_tasks(max);
    }

    pub fn await_no_tasks(&self) -> SchedResult<()> {
        self.executor.await_no_tasks()
    }

    pub fn await_end_tasks(&self, timeout: Duration) -> SchedResult<bool> {
        self.executor.await_end_tasks(timeout)
    }

    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Stop the workers and the timer, then fail every task still queued
    ///
    /// Tasks suspended at this point are abandoned. Calling it again is a
    /// no-op.
    pub fn shutdown(&self) -> SchedResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        kdebug!("runtime shutting down");
        self.executor.begin_shutdown();
        self.executor.timer().stop();
        let joined = match self.workers.lock().take() {
            Some(pool) => pool.join(),
            None => Ok(()),
        };
        self.executor.drain();
        joined
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            kwarn!("runtime shutdown: {}", e);
        }
    }
}
