//! Native-thread side of a bridge task
//!
//! A bridge task stands in for an OS thread inside a wait list. Waking it
//! sets a flag and notifies the condition variable the thread sleeps on.

use parking_lot::{Condvar, Mutex};
use std::thread::ThreadId;
use std::time::Instant;

pub(crate) struct NativeSignal {
    thread: ThreadId,
    fired: Mutex<bool>,
    cond: Condvar,
}

impl NativeSignal {
    pub(crate) fn new() -> Self {
        Self {
            thread: std::thread::current().id(),
            fired: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Thread the bridge was created on
    #[inline]
    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    pub(crate) fn fire(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cond.notify_all();
    }

    /// Block until fired or until `deadline`; returns whether it fired
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut fired = self.fired.lock();
        while !*fired {
            match deadline {
                Some(d) => {
                    if self.cond.wait_until(&mut fired, d).timed_out() {
                        return *fired;
                    }
                }
                None => self.cond.wait(&mut fired),
            }
        }
        true
    }
}
