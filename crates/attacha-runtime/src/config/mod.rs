//! Runtime configuration
//!
//! Compile-time defaults (`defaults`) with environment overrides and a
//! builder for programmatic tuning.
//!
//! ```rust,ignore
//! use attacha_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .num_workers(8)
//!     .max_running_tasks(64);
//! ```

pub mod defaults;

use attacha_core::constants::{MAX_WORKERS, MIN_STACK_SIZE};
use attacha_core::env::{env_get, env_get_bool, env_get_duration_ms};
use attacha_core::SchedError;
use std::time::Duration;

/// Runtime configuration with builder pattern
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Bound on tasks holding a run slot (parked waiters excluded), 0 = unlimited
    pub max_running_tasks: usize,
    /// Bound on created, unfinished tasks, 0 = unlimited
    pub max_planned_tasks: usize,
    /// Usable stack bytes per task
    pub stack_size: usize,
    /// Idle stacks kept for reuse
    pub stack_pool_capacity: usize,
    /// Keep diagnostic task names
    pub enable_task_naming: bool,
    /// Idle worker park timeout
    pub park_timeout: Duration,
    /// Upper bound on the timer thread's idle wait
    pub timer_interval: Duration,
    /// Enable debug logging of scheduler events
    pub debug_logging: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Create config from compile-time defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `ATTACHA_NUM_WORKERS`
    /// - `ATTACHA_MAX_RUNNING_TASKS`
    /// - `ATTACHA_MAX_PLANNED_TASKS`
    /// - `ATTACHA_STACK_SIZE`
    /// - `ATTACHA_STACK_POOL`
    /// - `ATTACHA_TASK_NAMING` (0/1)
    /// - `ATTACHA_PARK_TIMEOUT_MS`
    /// - `ATTACHA_TIMER_INTERVAL_MS`
    /// - `ATTACHA_DEBUG` (0/1)
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            num_workers: env_get("ATTACHA_NUM_WORKERS", base.num_workers),
            max_running_tasks: env_get("ATTACHA_MAX_RUNNING_TASKS", base.max_running_tasks),
            max_planned_tasks: env_get("ATTACHA_MAX_PLANNED_TASKS", base.max_planned_tasks),
            stack_size: env_get("ATTACHA_STACK_SIZE", base.stack_size),
            stack_pool_capacity: env_get("ATTACHA_STACK_POOL", base.stack_pool_capacity),
            enable_task_naming: env_get_bool("ATTACHA_TASK_NAMING", base.enable_task_naming),
            park_timeout: env_get_duration_ms("ATTACHA_PARK_TIMEOUT_MS", base.park_timeout),
            timer_interval: env_get_duration_ms("ATTACHA_TIMER_INTERVAL_MS", base.timer_interval),
            debug_logging: env_get_bool("ATTACHA_DEBUG", base.debug_logging),
        }
    }

    /// Create config with library defaults only (no env override)
    pub fn new() -> Self {
        Self {
            num_workers: defaults::NUM_WORKERS,
            max_running_tasks: defaults::MAX_RUNNING_TASKS,
            max_planned_tasks: defaults::MAX_PLANNED_TASKS,
            stack_size: defaults::STACK_SIZE,
            stack_pool_capacity: defaults::STACK_POOL_CAPACITY,
            enable_task_naming: defaults::ENABLE_TASK_NAMING,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            timer_interval: Duration::from_millis(defaults::TIMER_INTERVAL_MS),
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn max_running_tasks(mut self, n: usize) -> Self {
        self.max_running_tasks = n;
        self
    }

    pub fn max_planned_tasks(mut self, n: usize) -> Self {
        self.max_planned_tasks = n;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn stack_pool_capacity(mut self, n: usize) -> Self {
        self.stack_pool_capacity = n;
        self
    }

    pub fn enable_task_naming(mut self, enable: bool) -> Self {
        self.enable_task_naming = enable;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn timer_interval(mut self, d: Duration) -> Self {
        self.timer_interval = d;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers must be > 0"));
        }
        if self.num_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidValue("num_workers must be <= 256"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 64KB"));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        if self.timer_interval.is_zero() {
            return Err(ConfigError::InvalidValue("timer_interval must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("AttachA Runtime Configuration:");
        eprintln!("  num_workers:          {}", self.num_workers);
        eprintln!("  max_running_tasks:    {}", self.max_running_tasks);
        eprintln!("  max_planned_tasks:    {}", self.max_planned_tasks);
        eprintln!("  stack_size:           {}", self.stack_size);
        eprintln!("  stack_pool_capacity:  {}", self.stack_pool_capacity);
        eprintln!("  enable_task_naming:   {}", self.enable_task_naming);
        eprintln!("  park_timeout:         {:?}", self.park_timeout);
        eprintln!("  timer_interval:       {:?}", self.timer_interval);
        eprintln!("  debug_logging:        {}", self.debug_logging);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    InvalidValue(&'static str),
}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => SchedError::InvalidArgument(msg),
        }
    }
}
