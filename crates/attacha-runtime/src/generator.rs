//! Pull-based coroutine on its own fiber
//!
//! The body runs only while the consumer pulls. Each `get_result` resumes
//! the fiber at most once and hands back the next buffered value. The
//! generator never touches the executor queues, so it can be driven from a
//! task or from a plain OS thread.

use crate::fiber::{Fiber, FiberHandle};
use crate::memory::StackPool;
use crate::task::call_guarded;
use crate::tls;
use attacha_core::{kerror, Args, Callable, SchedError, SchedResult, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Generator body: produces values through the `Yielder`, its return value
/// (unless `Value::None`) is the last item
pub type GeneratorFn = Box<dyn FnOnce(&Yielder, Args) -> SchedResult<Value> + Send>;

#[derive(Default)]
struct GenShared {
    buffer: Mutex<VecDeque<Value>>,
    error: Mutex<Option<SchedError>>,
    cancel: AtomicBool,
}

/// Handed to the body; the only way to produce intermediate values
pub struct Yielder {
    handle: FiberHandle,
    shared: Arc<GenShared>,
}

impl Yielder {
    /// Publish `value` and pause until the consumer pulls again
    ///
    /// Returns `Cancelled` once the generator is being dropped; the body
    /// must then return without yielding again.
    pub fn yield_value(&self, value: Value) -> SchedResult<()> {
        if self.shared.cancel.load(Ordering::Acquire) {
            kerror!("generator yielded after cancellation");
            std::process::abort();
        }
        self.shared.buffer.lock().push_back(value);
        // Safety: the yielder only exists inside the generator's fiber
        unsafe { self.handle.suspend() };
        if self.shared.cancel.load(Ordering::Acquire) {
            return Err(SchedError::Cancelled);
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }
}

pub struct Generator {
    fiber: Fiber,
    shared: Arc<GenShared>,
}

impl Generator {
    pub fn new<F>(body: F, args: Args) -> Self
    where
        F: FnOnce(&Yielder, Args) -> SchedResult<Value> + Send + 'static,
    {
        Self::with_handler(Box::new(body), args, None)
    }

    /// Generator whose body errors are first offered to `handler`
    ///
    /// The handler is called with the error as its single argument; what it
    /// returns replaces the body's result.
    pub fn with_handler(body: GeneratorFn, args: Args, handler: Option<Callable>) -> Self {
        let pool = tls::effective_executor()
            .map(|exec| exec.stack_pool())
            .unwrap_or_else(StackPool::shared_default);
        let shared = Arc::new(GenShared::default());
        let inner = Arc::clone(&shared);

        let fiber = Fiber::new(pool, move |handle| {
            let yielder = Yielder { handle, shared: Arc::clone(&inner) };
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| body(&yielder, args))) {
                Ok(r) => r,
                Err(payload) => Err(SchedError::Panicked(crate::task::panic_message(payload))),
            };
            let outcome = match (outcome, handler) {
                (Err(SchedError::Cancelled), _) if inner.cancel.load(Ordering::Acquire) => {
                    Ok(Value::None)
                }
                (Err(e), Some(h)) => call_guarded(&h, vec![Value::exception(e)]),
                (other, _) => other,
            };
            match outcome {
                Ok(Value::None) => {}
                Ok(v) => inner.buffer.lock().push_back(v),
                Err(e) => *inner.error.lock() = Some(e),
            }
        });

        Self { fiber, shared }
    }

    /// Next produced value, `None` once the body is exhausted
    ///
    /// A stored body error is returned once, after every value produced
    /// before it.
    pub fn get_result(&mut self) -> SchedResult<Option<Value>> {
        if let Some(v) = self.shared.buffer.lock().pop_front() {
            return Ok(Some(v));
        }
        if !self.fiber.is_finished() {
            self.fiber.resume()?;
            if let Some(v) = self.shared.buffer.lock().pop_front() {
                return Ok(Some(v));
            }
        }
        match self.shared.error.lock().take() {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Buffered output, a pending error, or a body that can still advance
    pub fn has_result(&self) -> bool {
        !self.shared.buffer.lock().is_empty()
            || self.shared.error.lock().is_some()
            || !self.fiber.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.fiber.is_finished()
    }
}

impl Iterator for Generator {
    type Item = SchedResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_result().transpose()
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        if self.fiber.is_started() && !self.fiber.is_finished() {
            self.shared.cancel.store(true, Ordering::Release);
            if let Err(e) = self.fiber.resume() {
                kerror!("generator unwind failed: {}", e);
            }
        }
    }
}
