//! Minimal value container exchanged with tasks
//!
//! The interpreter's full value system lives outside this workspace. The
//! scheduler only needs something it can store in a result list, clone for
//! readers, hand to an exception handler and test for "handled" in the
//! event system, so `Value` is a small closed enum with an escape hatch
//! (`Opaque`) for collaborator-defined payloads.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use crate::error::{SchedError, SchedResult};

/// Argument buffer passed to a callable
pub type Args = Vec<Value>;

/// A value produced or consumed by a task
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value; also what a missing result index reads as
    #[default]
    None,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    List(Vec<Value>),

    /// An error stored as a task result
    Exception(Box<SchedError>),

    /// Payload owned by a collaborator
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Build a string value
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Wrap an error
    pub fn exception(err: SchedError) -> Self {
        Value::Exception(Box::new(err))
    }

    /// Wrap an arbitrary payload
    pub fn opaque<T: Any + Send + Sync>(payload: T) -> Self {
        Value::Opaque(Arc::new(payload))
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        matches!(self, Value::Exception(_))
    }

    /// Truthiness used by event listeners to report "handled"
    ///
    /// `None`, `false`, zero numbers, empty strings/bytes/lists and stored
    /// exceptions are falsy. Opaque payloads are truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::UInt(u) => *u != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Exception(_) => false,
            Value::Opaque(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Downcast an opaque payload
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(p) => p.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Turn a stored exception back into an error
    pub fn into_result(self) -> SchedResult<Value> {
        match self {
            Value::Exception(e) => Err(*e),
            v => Ok(v),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::UInt(u) => write!(f, "UInt({})", u),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            Value::List(l) => f.debug_tuple("List").field(l).finish(),
            Value::Exception(e) => write!(f, "Exception({})", e),
            Value::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInt(u)
    }
}

impl From<usize> for Value {
    fn from(u: usize) -> Self {
        Value::UInt(u as u64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<SchedError> for Value {
    fn from(e: SchedError) -> Self {
        Value::exception(e)
    }
}
