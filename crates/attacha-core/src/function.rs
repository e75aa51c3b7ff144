//! Callable abstraction executed by tasks
//!
//! The runtime never looks inside what it runs. A `Callable` is a closed set
//! of backends dispatched through one `call` method.

use core::fmt;
use std::sync::Arc;

use crate::error::SchedResult;
use crate::value::{Args, Value};

/// Plain function pointer backend
pub type NativeFn = fn(Args) -> SchedResult<Value>;

/// Closure backend
pub type ClosureFn = dyn Fn(Args) -> SchedResult<Value> + Send + Sync;

/// A function environment provided by an interpreter or other collaborator
pub trait FunctionEnvironment: Send + Sync {
    /// Invoke the function with the given arguments
    fn invoke(&self, args: Args) -> SchedResult<Value>;

    /// Name used in diagnostics
    fn name(&self) -> &str {
        "<environment>"
    }
}

/// Something a task can execute
#[derive(Clone)]
pub enum Callable {
    Native(NativeFn),
    Closure(Arc<ClosureFn>),
    Environment(Arc<dyn FunctionEnvironment>),
}

impl Callable {
    /// Wrap a closure
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Args) -> SchedResult<Value> + Send + Sync + 'static,
    {
        Callable::Closure(Arc::new(f))
    }

    /// Wrap a function environment
    pub fn from_env<E: FunctionEnvironment + 'static>(env: E) -> Self {
        Callable::Environment(Arc::new(env))
    }

    /// Invoke the callable
    #[inline]
    pub fn call(&self, args: Args) -> SchedResult<Value> {
        match self {
            Callable::Native(f) => f(args),
            Callable::Closure(f) => f(args),
            Callable::Environment(env) => env.invoke(args),
        }
    }

    /// Identity comparison: same function pointer or same shared backend
    pub fn same_as(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Native(a), Callable::Native(b)) => *a as usize == *b as usize,
            (Callable::Closure(a), Callable::Closure(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Callable::Environment(a), Callable::Environment(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl From<NativeFn> for Callable {
    fn from(f: NativeFn) -> Self {
        Callable::Native(f)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Native(p) => write!(f, "Callable::Native({:p})", *p as *const ()),
            Callable::Closure(_) => write!(f, "Callable::Closure"),
            Callable::Environment(e) => write!(f, "Callable::Environment({})", e.name()),
        }
    }
}
