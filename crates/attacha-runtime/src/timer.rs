//! Timer thread for sleeps and timed waits
//!
//! One thread owns a min-heap of wake times and sleeps on a condvar until
//! the earliest one is due, a new earlier entry arrives, or the poll
//! interval passes. Expired entries wake their task only if it is still in
//! the suspension epoch recorded at registration, so an entry left behind
//! by a wait that was notified first does nothing.

use crate::task::Task;
use attacha_core::{kdebug, SchedResult, WorkerError};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct SleepEntry {
    wake_at: Instant,
    /// Registration order, breaks ties so equal deadlines fire FIFO
    seq: u64,
    epoch: u64,
    task: Arc<Task>,
}

// Reverse ordering for min-heap (earliest wake time first)
impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl Eq for SleepEntry {}

#[derive(Default)]
struct TimerState {
    sleeping: BinaryHeap<SleepEntry>,
    next_seq: u64,
}

pub struct Timer {
    state: Mutex<TimerState>,
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Upper bound on one idle wait
    interval: Duration,
}

impl Timer {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState::default()),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
            interval,
        })
    }

    /// Spawn the timer thread
    pub fn start(self: &Arc<Self>) -> SchedResult<()> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("attacha-timer".to_string())
            .spawn(move || timer.run_loop())
            .map_err(|_| WorkerError::TimerSpawnFailed)?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the thread and drop every pending entry
    pub fn stop(&self) {
        {
            let _state = self.state.lock();
            self.shutdown.store(true, AtomicOrdering::Release);
            self.notify.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        let pending = std::mem::take(&mut self.state.lock().sleeping);
        drop(pending);
    }

    /// Wake `task` at `wake_at` if it is still in suspension `epoch`
    pub(crate) fn register(&self, task: Arc<Task>, wake_at: Instant, epoch: u64) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let earliest = state.sleeping.peek().is_none_or(|e| wake_at < e.wake_at);
        state.sleeping.push(SleepEntry { wake_at, seq, epoch, task });
        if earliest {
            self.notify.notify_one();
        }
    }

    /// Number of pending entries (stale ones included)
    pub fn pending(&self) -> usize {
        self.state.lock().sleeping.len()
    }

    fn run_loop(&self) {
        let mut state = self.state.lock();
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while state.sleeping.peek().is_some_and(|e| e.wake_at <= now) {
                if let Some(entry) = state.sleeping.pop() {
                    due.push(entry);
                }
            }
            if !due.is_empty() {
                // Waking may take the executor queue lock; never under ours
                drop(state);
                for entry in due {
                    entry.task.wake_if_epoch(entry.epoch);
                }
                state = self.state.lock();
                continue;
            }

            let wait = match state.sleeping.peek() {
                Some(next) => next.wake_at.saturating_duration_since(now).min(self.interval),
                None => self.interval,
            };
            self.notify.wait_for(&mut state, wait);
        }
        kdebug!("timer thread shutting down");
    }
}
