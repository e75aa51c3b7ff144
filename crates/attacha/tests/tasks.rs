//! Task lifecycle: results, yield mode, handlers, cancellation, timers

mod common;

use attacha::{Callable, EventSystem, Generator, Priority, SchedError, Task, TaskOptions, Value, Yielder};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_sleep_until_never_early() {
    let rt = common::runtime(2);
    let tasks: Vec<_> = [5u64, 20, 40]
        .into_iter()
        .map(|ms| {
            rt.spawn(move |_| {
                let target = Instant::now() + Duration::from_millis(ms);
                attacha::sleep_until(target)?;
                let now = Instant::now();
                Ok(Value::List(vec![
                    Value::Bool(now >= target),
                    Value::Bool(now < target + Duration::from_millis(500)),
                ]))
            })
            .unwrap()
        })
        .collect();

    for t in &tasks {
        let v = t.get_result(0).unwrap();
        assert_eq!(v, Value::List(vec![Value::Bool(true), Value::Bool(true)]));
    }
}

#[test]
fn test_results_are_append_only_snapshots() {
    let rt = common::runtime(2);
    let task = rt
        .spawn(|_| {
            attacha::result(Value::Int(1))?;
            attacha::result(Value::Int(2))?;
            Ok(Value::Int(3))
        })
        .unwrap();

    assert_eq!(task.get_result(1).unwrap(), Value::Int(2));
    let all = task.await_results().unwrap();
    assert_eq!(all, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(task.get_result(0).unwrap(), Value::Int(1));
    assert_eq!(task.get_result(7).unwrap(), Value::None);
}

#[test]
fn test_yield_mode_pauses_after_each_result() {
    let rt = common::runtime(2);
    let _enter = rt.enter();
    let steps = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&steps);
    let task = Task::with_options(
        Callable::from_fn(move |_| {
            for i in 0..3 {
                s.fetch_add(1, Ordering::SeqCst);
                attacha::result(Value::Int(i))?;
            }
            Ok(Value::str("end"))
        }),
        vec![],
        TaskOptions::new().yield_mode(true),
    )
    .unwrap();
    assert!(task.is_yield_mode());

    assert_eq!(task.get_result(0).unwrap(), Value::Int(0));
    std::thread::sleep(Duration::from_millis(20));
    // Paused: the body did not run ahead
    assert_eq!(steps.load(Ordering::SeqCst), 1);

    assert_eq!(task.get_result(1).unwrap(), Value::Int(1));
    assert_eq!(task.get_result(2).unwrap(), Value::Int(2));
    assert_eq!(task.get_result(3).unwrap(), Value::str("end"));
    assert!(task.is_ended());
}

#[test]
fn test_exception_stored_as_result() {
    let rt = common::runtime(2);
    let task = rt.spawn(|_| Err(SchedError::exception("Boom", "bad input"))).unwrap();
    let v = task.get_result(0).unwrap();
    assert!(v.is_exception());
    assert!(matches!(v.into_result(), Err(SchedError::Exception(e)) if e.name == "Boom"));
}

#[test]
fn test_panic_becomes_exception() {
    let rt = common::runtime(1);
    let r = rt.block_on(|_| panic!("exploded"));
    assert!(matches!(r, Err(SchedError::Panicked(msg)) if msg.contains("exploded")));
}

#[test]
fn test_exception_handler_replaces_result() {
    let rt = common::runtime(2);
    let _enter = rt.enter();
    let handler = Callable::from_fn(|args| match args.into_iter().next() {
        Some(Value::Exception(e)) => Ok(Value::str(&format!("handled: {}", e))),
        _ => Ok(Value::None),
    });
    let task = attacha::spawn_with(
        Callable::from_fn(|_| Err(SchedError::exception("Boom", "x"))),
        vec![],
        TaskOptions::new().exception_handler(handler),
    )
    .unwrap();
    let v = task.get_result(0).unwrap();
    assert!(v.as_str().is_some_and(|s| s.starts_with("handled:")));
}

#[test]
fn test_cancel_running_task() {
    let rt = common::runtime(2);
    let loops = Arc::new(AtomicUsize::new(0));
    let l = Arc::clone(&loops);
    let task = rt
        .spawn(move |_| loop {
            attacha::check_cancellation()?;
            l.fetch_add(1, Ordering::SeqCst);
            attacha::sleep_ms(1)?;
        })
        .unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || loops.load(Ordering::SeqCst) > 2));
    task.cancel();
    task.await_task().unwrap();
    assert!(task.is_cancelled());
    assert!(task.results().is_empty());
    assert_eq!(task.get_result(0).unwrap(), Value::None);
}

#[test]
fn test_cancel_before_first_run() {
    let rt = common::runtime(2);
    let _enter = rt.enter();
    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let task = Task::new(
        Callable::from_fn(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(Value::None)
        }),
        vec![],
    )
    .unwrap();
    task.cancel();
    task.await_task().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(task.results().is_empty());
}

#[test]
fn test_deadline_cancels_task() {
    let rt = common::runtime(2);
    let _enter = rt.enter();
    let task = attacha::spawn_with(
        Callable::from_fn(|_| loop {
            attacha::sleep_ms(2)?;
        }),
        vec![],
        TaskOptions::new().timeout(Duration::from_millis(20)),
    )
    .unwrap();
    task.await_task().unwrap();
    assert!(task.is_ended());
    assert!(task.results().is_empty());
}

#[test]
fn test_task_local_sharing() {
    let rt = common::runtime(2);
    let v = rt
        .block_on(|_| {
            attacha::task_local().set("k", Value::Int(1));
            let shared = attacha::spawn_with(
                Callable::from_fn(|_| Ok(attacha::task_local().get("k").unwrap_or(Value::None))),
                vec![],
                TaskOptions::new().use_local(true),
            )?;
            let private = attacha::spawn(|_| Ok(attacha::task_local().get("k").unwrap_or(Value::None)))?;
            Ok(Value::List(vec![shared.get_result(0)?, private.get_result(0)?]))
        })
        .unwrap();
    assert_eq!(v, Value::List(vec![Value::Int(1), Value::None]));
}

#[test]
fn test_generator_stops_after_end() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let mut g = Generator::new(
        move |y: &Yielder, args| {
            c.fetch_add(1, Ordering::SeqCst);
            for v in args {
                y.yield_value(v)?;
            }
            Ok(Value::None)
        },
        vec![Value::Int(1), Value::Int(2)],
    );

    assert_eq!(g.get_result().unwrap(), Some(Value::Int(1)));
    assert_eq!(g.get_result().unwrap(), Some(Value::Int(2)));
    assert_eq!(g.get_result().unwrap(), None);
    assert!(g.is_finished());
    for _ in 0..3 {
        assert_eq!(g.get_result().unwrap(), None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_generator_driven_from_task() {
    let rt = common::runtime(2);
    let v = rt
        .block_on(|_| {
            let g = Generator::new(
                |y: &Yielder, _| {
                    for i in 1..=4 {
                        attacha::yield_now()?;
                        y.yield_value(Value::Int(i))?;
                    }
                    Ok(Value::None)
                },
                vec![],
            );
            let mut sum = 0;
            for v in g {
                sum += v?.as_int().unwrap_or(0);
            }
            Ok(Value::Int(sum))
        })
        .unwrap();
    assert_eq!(v, Value::Int(10));
}

#[test]
fn test_event_priority_and_async_listeners() {
    let rt = common::runtime(2);
    let _enter = rt.enter();
    let events = EventSystem::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    for (tag, prio) in [("idle", Priority::Idle), ("high", Priority::High), ("normal", Priority::Normal)] {
        let lg = Arc::clone(&log);
        events.join(
            Callable::from_fn(move |_| {
                lg.lock().push(tag);
                Ok(Value::Bool(false))
            }),
            false,
            prio,
        );
    }
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    events.join(
        Callable::from_fn(move |args| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(args.into_iter().next().unwrap_or(Value::None))
        }),
        true,
        Priority::Low,
    );

    assert!(events.await_notify(vec![Value::Bool(true)]).unwrap());
    assert_eq!(*log.lock(), vec!["high", "normal", "idle"]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(!events.notify(vec![Value::Bool(false)]).unwrap());
    assert!(rt.await_end_tasks(Duration::from_secs(5)).unwrap());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn test_await_notify_waits_for_every_listener_before_failing() {
    let rt = common::runtime(2);
    let _enter = rt.enter();
    let events = EventSystem::new();
    let slow_done = Arc::new(AtomicUsize::new(0));

    events.join(
        Callable::from_fn(|_| Err(SchedError::exception("Boom", "listener failed"))),
        true,
        Priority::Critical,
    );
    let d = Arc::clone(&slow_done);
    events.join(
        Callable::from_fn(move |_| {
            attacha::sleep_ms(50)?;
            d.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Bool(true))
        }),
        true,
        Priority::Low,
    );

    let r = events.await_notify(vec![]);
    assert_eq!(slow_done.load(Ordering::SeqCst), 1);
    assert!(matches!(r, Err(SchedError::Exception(e)) if e.name == "Boom"));
}
