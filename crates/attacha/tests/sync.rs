//! Primitives shared between tasks and native threads

mod common;

use attacha::{
    MutexUnify, NativeMutex, Runtime, Task, TaskConditionVariable, TaskLimiter, TaskMutex, TaskQuery,
    TaskSemaphore, Value,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks how many callers are inside a section and the peak seen
#[derive(Default)]
struct Occupancy {
    inside: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[test]
fn test_mutex_excludes_tasks_and_threads() {
    let rt = Arc::new(common::runtime(4));
    let mutex = Arc::new(TaskMutex::new());
    let occ = Arc::new(Occupancy::default());
    let total = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let (m, o, t) = (Arc::clone(&mutex), Arc::clone(&occ), Arc::clone(&total));
            rt.spawn(move |_| {
                for _ in 0..50 {
                    m.lock()?;
                    o.enter();
                    attacha::yield_now()?;
                    t.fetch_add(1, Ordering::SeqCst);
                    o.leave();
                    m.unlock()?;
                }
                Ok(Value::None)
            })
            .unwrap()
        })
        .collect();

    let threads: Vec<_> = (0..2)
        .map(|_| {
            let (m, o, t) = (Arc::clone(&mutex), Arc::clone(&occ), Arc::clone(&total));
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let _g = m.lock_guard().unwrap();
                    o.enter();
                    std::thread::yield_now();
                    t.fetch_add(1, Ordering::SeqCst);
                    o.leave();
                }
            })
        })
        .collect();

    Task::await_multiple(&tasks, false).unwrap();
    for th in threads {
        th.join().unwrap();
    }
    assert_eq!(occ.peak(), 1);
    assert_eq!(total.load(Ordering::SeqCst), 10 * 50);
    assert!(!mutex.is_locked());
}

#[test]
fn test_condvar_wakes_in_arrival_order() {
    let rt = common::runtime(4);
    let mutex = Arc::new(TaskMutex::new());
    let cv = Arc::new(TaskConditionVariable::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let n = 5;

    let mut tasks = Vec::new();
    for i in 0..n {
        let (m, c, o) = (Arc::clone(&mutex), Arc::clone(&cv), Arc::clone(&order));
        tasks.push(
            rt.spawn(move |_| {
                let unify = MutexUnify::from(Arc::clone(&m));
                m.lock()?;
                c.wait(&unify)?;
                o.lock().push(i);
                m.unlock()?;
                Ok(Value::None)
            })
            .unwrap(),
        );
        // Queue the waiters one at a time so arrival order is known
        assert!(common::wait_until(Duration::from_secs(5), || cv.waiters() == i + 1));
    }

    for i in 0..n {
        cv.notify_one();
        assert!(common::wait_until(Duration::from_secs(5), || order.lock().len() == i + 1));
    }
    Task::await_multiple(&tasks, false).unwrap();
    assert_eq!(*order.lock(), (0..n).collect::<Vec<_>>());
}

#[test]
fn test_condvar_timeout_reacquires_lock() {
    let rt = common::runtime(2);
    let mutex = Arc::new(TaskMutex::new());
    let cv = Arc::new(TaskConditionVariable::new());
    let (m, c) = (Arc::clone(&mutex), Arc::clone(&cv));
    let v = rt
        .block_on(move |_| {
            let unify = MutexUnify::from(Arc::clone(&m));
            m.lock()?;
            let notified = c.wait_for(&unify, Duration::from_millis(10))?;
            let owned = m.is_own();
            m.unlock()?;
            Ok(Value::Bool(!notified && owned))
        })
        .unwrap();
    assert_eq!(v, Value::Bool(true));
    assert!(!cv.has_waiters());
}

#[test]
fn test_yield_relocking_releases_native_lock() {
    let rt = common::runtime(2);
    let native = Arc::new(NativeMutex::new());
    let n = Arc::clone(&native);

    let task = rt
        .spawn(move |_| {
            let unify = MutexUnify::from(Arc::clone(&n));
            unify.lock()?;
            for _ in 0..20 {
                attacha::Task::yield_relocking(std::slice::from_ref(&unify))?;
            }
            unify.unlock()?;
            Ok(Value::None)
        })
        .unwrap();

    while !task.is_ended() {
        // Only succeeds while the task is switched out
        if native.try_lock() {
            native.unlock().unwrap();
        }
        std::thread::yield_now();
    }
    task.await_task().unwrap();
    assert!(task.results()[0].is_none());
    assert!(!native.is_locked());
}

#[test]
fn test_admission_bound() {
    let rt = common::runtime(4);
    rt.set_max_running_tasks(2);
    let occ = Arc::new(Occupancy::default());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let o = Arc::clone(&occ);
            rt.spawn(move |_| {
                o.enter();
                // Occupy the worker without suspending
                std::thread::sleep(Duration::from_millis(5));
                o.leave();
                Ok(Value::None)
            })
            .unwrap()
        })
        .collect();

    Task::await_multiple(&tasks, false).unwrap();
    assert!(occ.peak() <= 2);
    assert!(rt.await_end_tasks(Duration::from_secs(5)).unwrap());
    assert_eq!(rt.stats().running, 0);
}

#[test]
fn test_awaiting_child_under_full_budget() {
    let rt = common::runtime(2);
    rt.set_max_running_tasks(1);

    let parent = rt
        .spawn(|_| {
            let child = attacha::spawn(|_| Ok(Value::Int(7)))?;
            child.get_result(0)
        })
        .unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || parent.is_ended()));
    assert_eq!(parent.get_result(0).unwrap(), Value::Int(7));
    assert!(rt.await_end_tasks(Duration::from_secs(5)).unwrap());
    assert_eq!(rt.stats().running, 0);
}

#[test]
fn test_parked_tasks_leave_the_budget_to_others() {
    let rt = common::runtime(2);
    rt.set_max_running_tasks(1);
    let mutex = Arc::new(TaskMutex::new());
    mutex.lock().unwrap();

    // Both park on the mutex; the second is only admitted once the first parks
    let tasks: Vec<_> = (0..2)
        .map(|i| {
            let m = Arc::clone(&mutex);
            rt.spawn(move |_| {
                m.lock()?;
                m.unlock()?;
                Ok(Value::Int(i))
            })
            .unwrap()
        })
        .collect();

    assert!(common::wait_until(Duration::from_secs(5), || mutex.waiters() == 2));
    assert!(common::wait_until(Duration::from_secs(5), || rt.stats().running == 0));
    mutex.unlock().unwrap();
    assert_eq!(Task::await_first_results(&tasks).unwrap(), vec![Value::Int(0), Value::Int(1)]);
}

/// Spawn a task that takes `acquire` and records that it got through
fn spawn_waiter(
    rt: &Runtime,
    passed: &Arc<AtomicUsize>,
    acquire: impl Fn() -> attacha::SchedResult<()> + Send + Sync + 'static,
    release: impl Fn() -> attacha::SchedResult<()> + Send + Sync + 'static,
) -> Arc<Task> {
    let p = Arc::clone(passed);
    rt.spawn(move |_| {
        acquire()?;
        p.fetch_add(1, Ordering::SeqCst);
        release()?;
        Ok(Value::None)
    })
    .unwrap()
}

#[test]
fn test_semaphore_cancelled_head_passes_permit_on() {
    let rt = common::runtime(2);
    let sem = Arc::new(TaskSemaphore::new(1));
    let passed = Arc::new(AtomicUsize::new(0));
    sem.lock().unwrap();

    let mut tasks = Vec::new();
    for i in 0..2 {
        let (a, r) = (Arc::clone(&sem), Arc::clone(&sem));
        tasks.push(spawn_waiter(&rt, &passed, move || a.lock(), move || {
            r.release();
            Ok(())
        }));
        assert!(common::wait_until(Duration::from_secs(5), || sem.waiters() == i + 1));
    }

    tasks[0].cancel();
    sem.release();
    assert!(common::wait_until(Duration::from_secs(5), || tasks[1].is_ended()));
    tasks[0].await_task().unwrap();
    assert!(tasks[0].is_cancelled() && tasks[0].results().is_empty());
    assert_eq!(passed.load(Ordering::SeqCst), 1);
    assert_eq!(sem.available(), 1);
}

#[test]
fn test_mutex_cancelled_head_hands_lock_on() {
    let rt = common::runtime(2);
    let mutex = Arc::new(TaskMutex::new());
    let passed = Arc::new(AtomicUsize::new(0));
    mutex.lock().unwrap();

    let mut tasks = Vec::new();
    for i in 0..2 {
        let (a, r) = (Arc::clone(&mutex), Arc::clone(&mutex));
        tasks.push(spawn_waiter(&rt, &passed, move || a.lock(), move || r.unlock()));
        assert!(common::wait_until(Duration::from_secs(5), || mutex.waiters() == i + 1));
    }

    tasks[0].cancel();
    mutex.unlock().unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || tasks[1].is_ended()));
    tasks[0].await_task().unwrap();
    assert!(tasks[0].is_cancelled() && tasks[0].results().is_empty());
    assert_eq!(passed.load(Ordering::SeqCst), 1);
    assert!(!mutex.is_locked());
}

#[test]
fn test_mutex_timed_out_waiter_leaves_queue() {
    let rt = common::runtime(2);
    let mutex = Arc::new(TaskMutex::new());
    let passed = Arc::new(AtomicUsize::new(0));
    mutex.lock().unwrap();

    let m = Arc::clone(&mutex);
    let timed = rt
        .spawn(move |_| Ok(Value::Bool(m.try_lock_for(Duration::from_millis(10))?)))
        .unwrap();
    let (a, r) = (Arc::clone(&mutex), Arc::clone(&mutex));
    let patient = spawn_waiter(&rt, &passed, move || a.lock(), move || r.unlock());

    assert_eq!(timed.get_result(0).unwrap(), Value::Bool(false));
    assert!(common::wait_until(Duration::from_secs(5), || mutex.waiters() == 1));
    mutex.unlock().unwrap();
    patient.await_task().unwrap();
    assert_eq!(passed.load(Ordering::SeqCst), 1);
    assert!(!mutex.is_locked());
}

#[test]
fn test_limiter_cancelled_head_hands_permit_on() {
    let rt = common::runtime(2);
    let limiter = Arc::new(TaskLimiter::new(1));
    let passed = Arc::new(AtomicUsize::new(0));
    limiter.lock().unwrap();

    let mut tasks = Vec::new();
    for i in 0..2 {
        let (a, r) = (Arc::clone(&limiter), Arc::clone(&limiter));
        tasks.push(spawn_waiter(&rt, &passed, move || a.lock(), move || r.unlock()));
        assert!(common::wait_until(Duration::from_secs(5), || limiter.waiters() == i + 1));
    }

    tasks[0].cancel();
    limiter.unlock().unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || tasks[1].is_ended()));
    tasks[0].await_task().unwrap();
    assert!(tasks[0].is_cancelled() && tasks[0].results().is_empty());
    assert_eq!(passed.load(Ordering::SeqCst), 1);
    assert_eq!(limiter.available(), 1);
}

#[test]
fn test_planned_limit_blocks_construction() {
    let rt = Arc::new(common::runtime(2));
    rt.set_max_planned_tasks(2);
    let (t1, t2) = {
        let _enter = rt.enter();
        let f = attacha::Callable::from_fn(|_| Ok(Value::None));
        (Task::new(f.clone(), vec![]).unwrap(), Task::new(f, vec![]).unwrap())
    };

    let created = Arc::new(AtomicUsize::new(0));
    let (r, c) = (Arc::clone(&rt), Arc::clone(&created));
    let th = std::thread::spawn(move || {
        let _enter = r.enter();
        let t3 = Task::new(attacha::Callable::from_fn(|_| Ok(Value::Int(3))), vec![]).unwrap();
        c.store(1, Ordering::SeqCst);
        t3.get_result(0).unwrap()
    });

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(created.load(Ordering::SeqCst), 0);
    t1.await_task().unwrap();
    assert_eq!(th.join().unwrap(), Value::Int(3));
    assert_eq!(created.load(Ordering::SeqCst), 1);
    t2.await_task().unwrap();
}

#[test]
fn test_semaphore_bounds_tasks() {
    let rt = common::runtime(4);
    let sem = Arc::new(TaskSemaphore::new(3));
    let occ = Arc::new(Occupancy::default());

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let (s, o) = (Arc::clone(&sem), Arc::clone(&occ));
            rt.spawn(move |_| {
                s.lock()?;
                o.enter();
                attacha::sleep_ms(2)?;
                o.leave();
                s.release();
                Ok(Value::None)
            })
            .unwrap()
        })
        .collect();

    Task::await_multiple(&tasks, false).unwrap();
    assert!(occ.peak() <= 3);
    assert_eq!(sem.available(), 3);
}

#[test]
fn test_query_respects_ceiling() {
    let rt = common::runtime(4);
    let _enter = rt.enter();
    let query = TaskQuery::new(2);
    let occ = Arc::new(Occupancy::default());
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let (o, d) = (Arc::clone(&occ), Arc::clone(&done));
        let t = Task::new(
            attacha::Callable::from_fn(move |_| {
                o.enter();
                attacha::sleep_ms(5)?;
                o.leave();
                d.fetch_add(1, Ordering::SeqCst);
                Ok(Value::None)
            }),
            vec![],
        )
        .unwrap();
        query.add_task(t).unwrap();
    }
    assert!(query.in_flight() <= 2);

    query.wait().unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 6);
    assert!(occ.peak() <= 2);
    assert!(query.is_empty());
}
