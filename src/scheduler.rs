//! Non-overlapping periodic scheduling.
//!
//! The scheduler runs one batch immediately, then at fixed deadlines. A
//! batch always runs to completion on the scheduler thread, so overlap is
//! structurally impossible; deadlines that pass while a batch is in flight
//! are skipped by advancing past them, never queued. A failing tick is
//! logged and followed by a cooldown strictly longer than the period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

/// Granularity of shutdown checks during idle waits.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct Scheduler {
    interval: Duration,
    cooldown: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// `cooldown` is the pause after a failed tick; callers are expected to
    /// configure it longer than `interval`.
    pub fn new(interval: Duration, cooldown: Duration, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            interval,
            cooldown,
            shutdown,
        }
    }

    /// Drive `tick` until the shutdown flag is set. The first tick runs
    /// immediately. Returns the number of ticks executed.
    pub fn run<F>(&self, mut tick: F) -> u64
    where
        F: FnMut() -> Result<()>,
    {
        let mut executed = 0u64;
        let mut deadline = Instant::now();

        loop {
            if !self.wait_until(deadline) {
                break;
            }

            executed += 1;
            // Fault boundary: a panicking tick is demoted to an error so a
            // single bad batch never terminates the process.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(&mut tick))
                .unwrap_or_else(|_| Err(anyhow!("batch tick panicked")));
            match result {
                Ok(()) => {
                    deadline = next_deadline(deadline, self.interval, Instant::now());
                }
                Err(err) => {
                    log::error!("scheduled batch failed: {err:#}");
                    if !self.wait_until(Instant::now() + self.cooldown) {
                        break;
                    }
                    deadline = next_deadline(deadline, self.interval, Instant::now());
                }
            }
        }

        log::info!("scheduler stopped after {executed} batches");
        executed
    }

    /// Sleep in slices until `deadline`, bailing out early on shutdown.
    /// Returns false when shutdown was requested.
    fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Advance `previous` by whole intervals until strictly past `now`.
/// Deadlines that fired while the last batch ran are dropped, not queued.
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let interval = interval.max(Duration::from_millis(1));
    let mut next = previous + interval;
    while next <= now {
        next += interval;
    }
    next
}
