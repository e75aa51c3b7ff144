//! Compile-time configuration defaults

/// Worker threads
pub const NUM_WORKERS: usize = 4;

/// Tasks holding a run slot, parked waiters excluded; 0 = unlimited
pub const MAX_RUNNING_TASKS: usize = 0;

/// Created, unfinished tasks; 0 = unlimited
pub const MAX_PLANNED_TASKS: usize = 0;

/// Usable stack bytes per task fiber
pub const STACK_SIZE: usize = attacha_core::constants::DEFAULT_STACK_SIZE;

/// Idle stacks kept for reuse
pub const STACK_POOL_CAPACITY: usize = crate::memory::DEFAULT_POOL_CAPACITY;

/// Keep diagnostic task names
pub const ENABLE_TASK_NAMING: bool = false;

/// Idle worker park timeout
pub const PARK_TIMEOUT_MS: u64 = 100;

/// Upper bound on the timer thread's idle wait
pub const TIMER_INTERVAL_MS: u64 = 10;

pub const DEBUG_LOGGING: bool = false;
