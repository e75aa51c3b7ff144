//! Per-execution-context key/value store
//!
//! Each task gets one lazily; tasks created with `use_local` share their
//! creator's. Native threads get a thread-scoped one.

use attacha_core::Value;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct TaskLocal {
    entries: Mutex<HashMap<String, Value>>,
}

impl TaskLocal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the value stored under `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    /// Store a value, returning the previous one
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.lock().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
