//! Error types for the AttachA task runtime

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    /// The current task was cancelled (explicitly or by its deadline)
    #[error("operation cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// Unlocking a lock the caller does not hold
    #[error("unlock of a lock not owned by the caller")]
    NotOwner,

    /// Locking a non-recursive task lock the caller already holds
    #[error("lock already held by the caller")]
    AlreadyLocked,

    /// Re-entering a limiter the caller already holds
    #[error("limiter re-entered by its holder (self deadlock)")]
    LimiterDeadlock,

    /// A scheduler operation was invoked from the wrong kind of context
    #[error("environment misuse: {0}")]
    EnvironmentMisuse(&'static str),

    /// Invalid argument to a runtime operation
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No runtime is current on this thread
    #[error("runtime not initialized")]
    NotInitialized,

    /// Runtime already initialized
    #[error("runtime already initialized")]
    AlreadyInitialized,

    /// Runtime is shutting down and refused the operation
    #[error("runtime is shutting down")]
    ShuttingDown,

    /// Error raised by a task body
    #[error("exception: {0}")]
    Exception(Exception),

    /// A task body panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Fiber stack allocation failed
    #[error("memory error: {0}")]
    MemoryError(MemoryError),

    /// Worker thread error
    #[error("worker error: {0}")]
    WorkerError(WorkerError),
}

impl SchedError {
    /// Build an exception error with a name and message
    pub fn exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        SchedError::Exception(Exception::new(name, message))
    }

    /// Check if this error is a cancellation
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SchedError::Cancelled)
    }
}

/// Error value raised by task code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    /// Exception class name
    pub name: String,

    /// Human readable message
    pub message: String,
}

impl Exception {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl From<Exception> for SchedError {
    fn from(e: Exception) -> Self {
        SchedError::Exception(e)
    }
}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// mmap failed
    #[error("memory allocation failed")]
    AllocationFailed,

    /// mprotect failed
    #[error("memory protection change failed")]
    ProtectionFailed,

    /// Requested stack is below the minimum size
    #[error("stack size too small")]
    StackTooSmall,
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}

/// Worker thread related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// Failed to spawn worker thread
    #[error("failed to spawn worker thread")]
    SpawnFailed,

    /// Failed to spawn the timer thread
    #[error("failed to spawn timer thread")]
    TimerSpawnFailed,

    /// Worker thread panicked
    #[error("worker thread panicked")]
    Panicked,
}

impl From<WorkerError> for SchedError {
    fn from(e: WorkerError) -> Self {
        SchedError::WorkerError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SchedError::Cancelled;
        assert_eq!(format!("{}", e), "operation cancelled");

        let e = SchedError::MemoryError(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: memory allocation failed");

        let e = SchedError::exception("ValueError", "bad input");
        assert_eq!(format!("{}", e), "exception: ValueError: bad input");
    }

    #[test]
    fn test_error_conversion() {
        let mem_err = MemoryError::StackTooSmall;
        let sched_err: SchedError = mem_err.into();
        assert!(matches!(sched_err, SchedError::MemoryError(MemoryError::StackTooSmall)));

        let worker_err: SchedError = WorkerError::SpawnFailed.into();
        assert!(matches!(worker_err, SchedError::WorkerError(WorkerError::SpawnFailed)));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(SchedError::Cancelled.is_cancelled());
        assert!(!SchedError::Timeout.is_cancelled());
    }
}
