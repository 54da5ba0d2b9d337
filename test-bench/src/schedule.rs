//! Fixed-rate execution of a tick function.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, warn};

/// Longest uninterrupted sleep, so a shutdown request is noticed promptly.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub ticks: u64,
    pub overruns: u64,
    pub errors: u64,
}

/// Call `body` once per `period` until `shutdown` is set or `max_ticks` ticks
/// have run.
///
/// A failing tick is logged and the loop carries on. A tick that takes longer
/// than `period` is logged as an overrun and the next one starts immediately.
pub fn run_fixed_rate<E, F>(
    name: &str,
    period: Duration,
    shutdown: &AtomicBool,
    max_ticks: Option<u64>,
    mut body: F,
) -> RunSummary
where
    E: Display,
    F: FnMut() -> Result<(), E>,
{
    let mut summary = RunSummary::default();
    let limit_reached = |summary: &RunSummary| max_ticks.is_some_and(|max| summary.ticks >= max);

    while !shutdown.load(Ordering::Relaxed) && !limit_reached(&summary) {
        let started = Instant::now();
        if let Err(e) = body() {
            summary.errors += 1;
            error!("{} tick {} failed: {}", name, summary.ticks + 1, e);
        }
        summary.ticks += 1;

        let elapsed = started.elapsed();
        match period.checked_sub(elapsed) {
            Some(remaining) if !limit_reached(&summary) => sleep_unless_shutdown(remaining, shutdown),
            Some(_) => {}
            None => {
                summary.overruns += 1;
                warn!(
                    "{} tick {} overran: {:.3}s > {:.3}s",
                    name,
                    summary.ticks,
                    elapsed.as_secs_f64(),
                    period.as_secs_f64()
                );
            }
        }
    }
    summary
}

fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
