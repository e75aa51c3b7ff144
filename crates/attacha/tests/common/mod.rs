use attacha::{Runtime, RuntimeConfig};
use std::time::{Duration, Instant};

/// Started runtime with small stacks
pub fn runtime(workers: usize) -> Runtime {
    let rt = Runtime::new(
        RuntimeConfig::new()
            .num_workers(workers)
            .stack_size(256 * 1024)
            .park_timeout(Duration::from_millis(5)),
    )
    .unwrap();
    rt.start().unwrap();
    rt
}

/// Poll `cond` from a native thread until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
