//! Bounded job queue
//!
//! `add_task` starts a task right away while fewer than
//! `max_at_execution` query tasks are in flight (and the query is enabled),
//! otherwise buffers it. Each completion promotes the next buffered task.

use crate::task::Task;
use crate::wait::{self, WaitOutcome};
use attacha_core::{kwarn, SchedResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

struct QueryState {
    buffer: VecDeque<Arc<Task>>,
    in_flight: usize,
    /// 0 = unlimited
    max_at_execution: usize,
    enabled: bool,
    idle_waiters: VecDeque<Arc<Task>>,
}

impl QueryState {
    fn has_room(&self) -> bool {
        self.enabled && (self.max_at_execution == 0 || self.in_flight < self.max_at_execution)
    }

    fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.in_flight == 0
    }

    /// Pop every buffered task that may start now
    fn take_startable(&mut self) -> Vec<Arc<Task>> {
        let mut out = Vec::new();
        while self.has_room() {
            let Some(t) = self.buffer.pop_front() else { break };
            self.in_flight += 1;
            out.push(t);
        }
        out
    }
}

struct QueryInner {
    state: Mutex<QueryState>,
}

impl QueryInner {
    fn start_all(self: &Arc<Self>, tasks: Vec<Arc<Task>>) {
        for t in tasks {
            if let Err(e) = t.start() {
                kwarn!("query could not start task {}: {}", t.id(), e);
                self.on_task_done();
            }
        }
    }

    fn on_task_done(self: &Arc<Self>) {
        let (startable, idle) = {
            let mut st = self.state.lock();
            st.in_flight = st.in_flight.saturating_sub(1);
            let startable = st.take_startable();
            let idle = if st.is_idle() { std::mem::take(&mut st.idle_waiters) } else { VecDeque::new() };
            (startable, idle)
        };
        for w in idle {
            w.wake();
        }
        self.start_all(startable);
    }
}

pub struct TaskQuery {
    inner: Arc<QueryInner>,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TaskQuery {
    /// Query running at most `max_at_execution` tasks at once (0 = no limit)
    pub fn new(max_at_execution: usize) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                state: Mutex::new(QueryState {
                    buffer: VecDeque::new(),
                    in_flight: 0,
                    max_at_execution,
                    enabled: true,
                    idle_waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Submit a task, starting it now if the ceiling allows
    ///
    /// A task that already ended is ignored.
    pub fn add_task(&self, task: Arc<Task>) -> SchedResult<()> {
        let weak: Weak<QueryInner> = Arc::downgrade(&self.inner);
        let hook = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_task_done();
            }
        });

        let mut st = self.inner.state.lock();
        if !task.add_completion_hook(hook) {
            return Ok(());
        }
        if st.has_room() {
            st.in_flight += 1;
            drop(st);
            if let Err(e) = task.start() {
                self.inner.on_task_done();
                return Err(e);
            }
        } else {
            st.buffer.push_back(task);
        }
        Ok(())
    }

    /// Resume admissions
    pub fn enable(&self) {
        let startable = {
            let mut st = self.inner.state.lock();
            st.enabled = true;
            st.take_startable()
        };
        self.inner.start_all(startable);
    }

    /// Pause admissions; buffered tasks stay buffered
    pub fn disable(&self) {
        self.inner.state.lock().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Whether `task` is buffered in this query
    pub fn in_query(&self, task: &Arc<Task>) -> bool {
        self.inner.state.lock().buffer.iter().any(|t| Arc::ptr_eq(t, task))
    }

    pub fn set_max_at_execution(&self, max: usize) {
        let startable = {
            let mut st = self.inner.state.lock();
            st.max_at_execution = max;
            st.take_startable()
        };
        self.inner.start_all(startable);
    }

    pub fn max_at_execution(&self) -> usize {
        self.inner.state.lock().max_at_execution
    }

    /// Buffered tasks
    pub fn len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Wait until nothing is buffered or in flight
    pub fn wait(&self) -> SchedResult<()> {
        self.wait_inner(None).map(|_| ())
    }

    pub fn wait_for(&self, timeout: Duration) -> SchedResult<bool> {
        self.wait_until(Instant::now() + timeout)
    }

    /// True if the query became idle before `deadline`
    pub fn wait_until(&self, deadline: Instant) -> SchedResult<bool> {
        self.wait_inner(Some(deadline))
    }

    fn wait_inner(&self, deadline: Option<Instant>) -> SchedResult<bool> {
        loop {
            let st = self.inner.state.lock();
            if st.is_idle() {
                return Ok(true);
            }
            let outcome = wait::block_on_list(st, |s| &mut s.idle_waiters, deadline, &[])?;
            Task::check_cancellation()?;
            if outcome == WaitOutcome::TimedOut {
                return Ok(self.inner.state.lock().is_idle());
            }
        }
    }
}

impl Drop for TaskQuery {
    fn drop(&mut self) {
        let waiters = std::mem::take(&mut self.inner.state.lock().idle_waiters);
        wait::cancel_waiters(waiters);
    }
}
