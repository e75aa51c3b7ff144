//! Prioritized publish/subscribe bus
//!
//! Ten listener lists: five priority tiers, each split into synchronous
//! listeners (called inline by the notifier) and asynchronous ones (run as
//! independent tasks). A truthy return from a listener means "handled".

use crate::task::Task;
use attacha_core::constants::PRIORITY_TIERS;
use attacha_core::{Args, Callable, Priority, SchedResult};
use parking_lot::Mutex;
use std::sync::Arc;

const LISTS: usize = PRIORITY_TIERS * 2;

#[inline]
fn slot(priority: Priority, is_async: bool) -> usize {
    priority.as_index() * 2 + is_async as usize
}

#[derive(Default)]
pub struct EventSystem {
    listeners: Mutex<[Vec<Callable>; LISTS]>,
}

impl EventSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, func: Callable, is_async: bool, priority: Priority) {
        self.listeners.lock()[slot(priority, is_async)].push(func);
    }

    /// Remove the first matching listener; false if none matched
    pub fn leave(&self, func: &Callable, is_async: bool, priority: Priority) -> bool {
        let mut lists = self.listeners.lock();
        let list = &mut lists[slot(priority, is_async)];
        match list.iter().position(|f| f.same_as(func)) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listeners of one kind in priority order, copied out of the lock so
    /// handlers may join or leave while running
    fn snapshot(&self, is_async: bool) -> Vec<Callable> {
        let lists = self.listeners.lock();
        Priority::iter()
            .flat_map(|p| lists[slot(p, is_async)].iter().cloned())
            .collect()
    }

    fn sync_pass(&self, args: &Args) -> SchedResult<bool> {
        for f in self.snapshot(false) {
            if f.call(args.clone())?.is_truthy() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn spawn_async(&self, args: &Args) -> SchedResult<Vec<Arc<Task>>> {
        let mut tasks = Vec::new();
        for f in self.snapshot(true) {
            let t = Task::new(f, args.clone())?;
            t.start()?;
            tasks.push(t);
        }
        Ok(tasks)
    }

    /// Run sync listeners until one handles the event; if none does, fire
    /// every async listener without waiting and return false
    pub fn notify(&self, args: Args) -> SchedResult<bool> {
        if self.sync_pass(&args)? {
            return Ok(true);
        }
        self.spawn_async(&args)?;
        Ok(false)
    }

    /// As `notify`, then wait for every async listener; true if any
    /// listener handled the event
    ///
    /// All listeners are awaited before a failure is reported; the first
    /// one to fail, in priority order, is returned.
    pub fn await_notify(&self, args: Args) -> SchedResult<bool> {
        if self.sync_pass(&args)? {
            return Ok(true);
        }
        let tasks = self.spawn_async(&args)?;
        Task::await_multiple(&tasks, false)?;

        let mut handled = false;
        let mut first_err = None;
        for v in tasks.iter().flat_map(|t| t.results()) {
            match v.into_result() {
                Ok(v) => handled |= v.is_truthy(),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(handled), Err)
    }

    /// Call every listener inline, async ones included, in priority order;
    /// stops at the first that handles the event
    pub fn sync_notify(&self, args: Args) -> SchedResult<bool> {
        let all: Vec<Callable> = {
            let lists = self.listeners.lock();
            Priority::iter()
                .flat_map(|p| {
                    lists[slot(p, false)]
                        .iter()
                        .chain(lists[slot(p, true)].iter())
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        for f in all {
            if f.call(args.clone())?.is_truthy() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fire every listener, sync ones included, as a task; no waiting
    pub fn async_notify(&self, args: Args) -> SchedResult<()> {
        let all: Vec<Callable> = {
            let lists = self.listeners.lock();
            lists.iter().flat_map(|l| l.iter().cloned()).collect()
        };
        for f in all {
            Task::new(f, args.clone())?.start()?;
        }
        Ok(())
    }
}
