//! Stress test - many tasks
//!
//! Spawns large numbers of yielding tasks under a running-task limit and
//! funnels them through a shared semaphore.
//!
//! Usage: `stress [num_tasks] [max_running]`

use attacha::{Runtime, RuntimeConfig, SchedResult, TaskSemaphore, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> SchedResult<()> {
    println!("=== AttachA Stress Test ===\n");

    let mut args = std::env::args().skip(1);
    let num_tasks: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let max_running: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    let config = RuntimeConfig::from_env()
        .num_workers(8)
        .max_running_tasks(max_running)
        .stack_size(256 * 1024);
    let runtime = Runtime::new(config)?;
    runtime.start()?;
    let _enter = runtime.enter();

    println!("Spawning {} tasks (max running: {})...", num_tasks, max_running);

    let completed = Arc::new(AtomicU64::new(0));
    let gate = Arc::new(TaskSemaphore::new(64));
    let start = Instant::now();

    let mut tasks = Vec::with_capacity(num_tasks);
    for i in 0..num_tasks {
        let (c, g) = (Arc::clone(&completed), Arc::clone(&gate));
        tasks.push(attacha::spawn(move |_| {
            for _ in 0..10 {
                attacha::yield_now()?;
            }
            g.lock()?;
            attacha::yield_now()?;
            g.release();
            c.fetch_add(1, Ordering::Relaxed);
            Ok(Value::None)
        })?);

        if (i + 1) % 1000 == 0 {
            print!("\rSpawned: {}/{}", i + 1, num_tasks);
        }
    }

    let spawn_time = start.elapsed();
    println!("\n\nSpawn time: {:?}", spawn_time);
    println!("Spawn rate: {:.0} tasks/sec", num_tasks as f64 / spawn_time.as_secs_f64());

    println!("\nWaiting for completion...");
    let run_start = Instant::now();
    if !runtime.await_end_tasks(Duration::from_secs(30))? {
        println!(
            "Timeout! Only {}/{} completed",
            completed.load(Ordering::Relaxed),
            num_tasks
        );
    }
    let failed = tasks
        .iter()
        .filter(|t| t.results().first().is_some_and(Value::is_exception))
        .count();
    drop(tasks);

    let total_time = start.elapsed();
    let run_time = run_start.elapsed();
    let stats = runtime.stats();

    println!("\n=== Results ===");
    println!("Total tasks:     {}", num_tasks);
    println!("Completed:       {}", completed.load(Ordering::Relaxed));
    println!("Failed:          {}", failed);
    println!("Spawn time:      {:?}", spawn_time);
    println!("Run time:        {:?}", run_time);
    println!("Total time:      {:?}", total_time);
    println!("Throughput:      {:.0} tasks/sec", num_tasks as f64 / total_time.as_secs_f64());
    println!("Left over:       {:?}", stats);

    runtime.shutdown()?;
    println!("\n=== Stress Test Complete ===");
    Ok(())
}
