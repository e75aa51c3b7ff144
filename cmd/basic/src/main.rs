//! Basic AttachA example
//!
//! Tasks producing results, a mutex shared with the main thread, a
//! condition-variable handoff, an event bus and a generator.
//!
//! # Environment Variables
//!
//! - `ATTACHA_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `ATTACHA_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use attacha::{
    Callable, EventSystem, Generator, MutexUnify, Priority, Runtime, RuntimeConfig, SchedResult, Task,
    TaskConditionVariable, TaskMutex, Value, Yielder,
};
use attacha::{kdebug, kinfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ATTACHA_LOG_LEVEL=debug ATTACHA_FLUSH_EPRINT=1 cargo run -p attacha-basic
fn main() -> SchedResult<()> {
    println!("=== AttachA Basic Example ===\n");

    let config = RuntimeConfig::from_env().num_workers(4).enable_task_naming(true);
    let runtime = Runtime::new(config)?;
    runtime.start()?;
    let _enter = runtime.enter();

    // Tasks with intermediate results
    let squares: Vec<Arc<Task>> = (1..=3)
        .map(|i| {
            attacha::spawn(move |_| {
                kdebug!("[task {}] started", i);
                attacha::result(Value::Int(i))?;
                attacha::yield_now()?;
                Ok(Value::Int(i * i))
            })
        })
        .collect::<SchedResult<_>>()?;
    for t in &squares {
        println!("Task {} produced {:?}", t.id(), t.await_results()?);
    }

    // A mutex shared by tasks and this native thread
    let lock = Arc::new(TaskMutex::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let workers: Vec<Arc<Task>> = (0..4)
        .map(|_| {
            let (l, c) = (Arc::clone(&lock), Arc::clone(&counter));
            attacha::spawn(move |_| {
                for _ in 0..100 {
                    let _g = l.lock_guard()?;
                    c.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Value::None)
            })
        })
        .collect::<SchedResult<_>>()?;
    for _ in 0..100 {
        let _g = lock.lock_guard()?;
        counter.fetch_add(1, Ordering::Relaxed);
    }
    Task::await_multiple(&workers, false)?;
    println!("\nShared counter: {}", counter.load(Ordering::Relaxed));

    // Condition variable handoff
    let mailbox = Arc::new(Mailbox::default());
    let cv = Arc::new(TaskConditionVariable::new());
    let (m, c) = (Arc::clone(&mailbox), Arc::clone(&cv));
    let consumer = attacha::spawn(move |_| {
        let unify = MutexUnify::from(Arc::clone(&m.lock));
        m.lock.lock()?;
        while m.value.load(Ordering::Acquire) == 0 {
            c.wait(&unify)?;
        }
        let v = m.value.load(Ordering::Acquire);
        m.lock.unlock()?;
        Ok(Value::UInt(v as u64))
    })?;
    attacha::sleep(Duration::from_millis(10))?;
    {
        let _g = mailbox.lock.lock_guard()?;
        mailbox.value.store(7, Ordering::Release);
        cv.notify_one();
    }
    println!("Consumer received {:?}", consumer.get_result(0)?);

    // Event bus
    let events = EventSystem::new();
    events.join(
        Callable::from_fn(|args| {
            kinfo!("low priority listener saw {:?}", args);
            Ok(Value::Bool(true))
        }),
        false,
        Priority::Low,
    );
    events.join(
        Callable::from_fn(|_| {
            kinfo!("high priority listener passes");
            Ok(Value::Bool(false))
        }),
        false,
        Priority::High,
    );
    println!("Event handled: {}", events.notify(vec![Value::str("ping")])?);

    // Generator
    let fib = Generator::new(
        |y: &Yielder, _| {
            let (mut a, mut b) = (0i64, 1i64);
            for _ in 0..10 {
                y.yield_value(Value::Int(a))?;
                (a, b) = (b, a + b);
            }
            Ok(Value::None)
        },
        vec![],
    );
    let values: Vec<Value> = fib.collect::<SchedResult<_>>()?;
    println!("Fibonacci: {:?}", values);

    runtime.await_no_tasks()?;
    runtime.shutdown()?;
    println!("\n=== Example Complete ===");
    Ok(())
}

/// A value guarded by a task mutex
#[derive(Default)]
struct Mailbox {
    lock: Arc<TaskMutex>,
    value: AtomicUsize,
}
