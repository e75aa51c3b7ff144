//! Task identifier type

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a Task
///
/// Identifiers are allocated from a process-wide counter and never reused.
/// Zero is reserved as the sentinel for "no task".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TaskId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Sentinel value indicating no task
    pub const NONE: TaskId = TaskId(0);

    /// Allocate a fresh identifier
    #[inline]
    pub fn next() -> Self {
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a TaskId from a raw value
    #[inline]
    pub const fn new(id: u64) -> Self {
        TaskId(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Check if this is a valid task ID
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<TaskId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u64> for TaskId {
    #[inline]
    fn from(id: u64) -> Self {
        TaskId(id)
    }
}

impl From<TaskId> for u64 {
    #[inline]
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "TaskId(NONE)")
        } else {
            write!(f, "TaskId({})", self.0)
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for TaskId {
    fn default() -> Self {
        TaskId::NONE
    }
}
