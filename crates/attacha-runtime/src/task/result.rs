//! Append-only result stream of a task
//!
//! Values are only ever pushed; index `i` never changes once present and
//! every read is a clone taken under the lock. `end_of_life` is set exactly
//! once, after which no value is appended.

use crate::task::Task;
use attacha_core::Value;
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) type CompletionHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub(crate) struct ResultState {
    pub(crate) values: Vec<Value>,
    pub(crate) end_of_life: bool,
    /// Everybody waiting for a new value or for the end of the task
    pub(crate) waiters: VecDeque<Arc<Task>>,
    pub(crate) hooks: Vec<CompletionHook>,
}

impl ResultState {
    /// Snapshot read of one index
    pub(crate) fn read(&self, index: usize) -> Option<Value> {
        self.values.get(index).cloned()
    }

    /// Append an intermediate value; returns the waiters to wake
    pub(crate) fn push(&mut self, value: Value) -> Option<VecDeque<Arc<Task>>> {
        if self.end_of_life {
            return None;
        }
        self.values.push(value);
        Some(std::mem::take(&mut self.waiters))
    }

    /// Mark the stream finished, optionally with a final value
    ///
    /// Returns the waiters and completion hooks to run outside the lock, or
    /// `None` if the stream had already ended.
    pub(crate) fn finish(&mut self, value: Option<Value>) -> Option<(VecDeque<Arc<Task>>, Vec<CompletionHook>)> {
        if self.end_of_life {
            return None;
        }
        if let Some(v) = value {
            self.values.push(v);
        }
        self.end_of_life = true;
        Some((std::mem::take(&mut self.waiters), std::mem::take(&mut self.hooks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_is_once() {
        let mut r = ResultState::default();
        assert!(r.push(Value::Int(1)).is_some());
        assert!(r.finish(Some(Value::Int(2))).is_some());
        assert!(r.finish(Some(Value::Int(3))).is_none());
        assert!(r.push(Value::Int(4)).is_none());
        assert_eq!(r.values, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(r.read(1), Some(Value::Int(2)));
        assert_eq!(r.read(2), None);
    }
}
