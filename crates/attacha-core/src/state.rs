//! Task state and priority types

use core::fmt;

/// Lifecycle state of a Task
///
/// ```text
/// Planned -> Queued -> Running -> Suspended <-> Running -> Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Created, not yet started
    Planned = 0,

    /// Started and waiting in the ready or cold queue
    Queued = 1,

    /// Currently executing on a worker
    Running = 2,

    /// Switched out: waiting on a lock, condition, timer, result or yield
    Suspended = 3,

    /// Finished (value, stored exception, or cancellation)
    Completed = 4,
}

impl TaskState {
    /// Check if the task may be picked by a worker
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, TaskState::Queued)
    }

    /// Check if the task has reached its terminal state
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, TaskState::Completed)
    }
}

impl From<u8> for TaskState {
    fn from(v: u8) -> Self {
        match v {
            0 => TaskState::Planned,
            1 => TaskState::Queued,
            2 => TaskState::Running,
            3 => TaskState::Suspended,
            4 => TaskState::Completed,
            _ => TaskState::Planned, // Default for invalid values
        }
    }
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> u8 {
        state as u8
    }
}

/// Priority tier for event listeners
///
/// Listeners of a higher tier are always called before lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// Called before everything else
    Critical = 0,

    /// Latency-sensitive listeners
    High = 1,

    /// Default tier
    Normal = 2,

    /// Background listeners
    Low = 3,

    /// Called last, after every other tier
    Idle = 4,
}

impl Priority {
    /// Number of priority levels
    pub const COUNT: usize = 5;

    /// Get priority as index (0 = Critical, 4 = Idle)
    #[inline]
    pub const fn as_index(&self) -> usize {
        *self as usize
    }

    /// Get priority from index
    #[inline]
    pub const fn from_index(idx: usize) -> Option<Priority> {
        match idx {
            0 => Some(Priority::Critical),
            1 => Some(Priority::High),
            2 => Some(Priority::Normal),
            3 => Some(Priority::Low),
            4 => Some(Priority::Idle),
            _ => None,
        }
    }

    /// Iterator over all priorities (highest to lowest)
    pub fn iter() -> impl Iterator<Item = Priority> {
        [
            Priority::Critical,
            Priority::High,
            Priority::Normal,
            Priority::Low,
            Priority::Idle,
        ]
        .into_iter()
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "CRITICAL"),
            Priority::High => write!(f, "HIGH"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::Low => write!(f, "LOW"),
            Priority::Idle => write!(f, "IDLE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(TaskState::Queued.is_runnable());
        assert!(!TaskState::Running.is_runnable());
        assert!(!TaskState::Suspended.is_runnable());

        assert!(TaskState::Completed.is_terminated());
        assert!(!TaskState::Running.is_terminated());
    }

    #[test]
    fn test_state_roundtrip_u8() {
        for state in [
            TaskState::Planned,
            TaskState::Queued,
            TaskState::Running,
            TaskState::Suspended,
            TaskState::Completed,
        ] {
            assert_eq!(TaskState::from(u8::from(state)), state);
        }
        assert_eq!(TaskState::from(200), TaskState::Planned);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert!(Priority::Low < Priority::Idle);
    }

    #[test]
    fn test_priority_iter_matches_index() {
        for (i, p) in Priority::iter().enumerate() {
            assert_eq!(p.as_index(), i);
            assert_eq!(Priority::from_index(i), Some(p));
        }
        assert_eq!(Priority::iter().count(), Priority::COUNT);
        assert_eq!(Priority::from_index(Priority::COUNT), None);
    }
}
