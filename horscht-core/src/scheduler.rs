// ABOUTME: Whole-second cron scheduler driven by the event loop's coarse ticker.
// ABOUTME: A task with interval k fires on every second where elapsed mod k == 0.

use std::time::Duration;
use tokio::time::Instant;

use crate::registry::CronSpec;

/// Default lower bound for the elapsed-seconds wrap threshold.
pub const DEFAULT_WRAP_BASE: u64 = 65_000;

const SECOND: Duration = Duration::from_secs(1);

/// Counts elapsed whole seconds and decides which cron tasks are due.
///
/// The counter wraps at the smallest multiple of the LCM of all intervals
/// that is at least the configured base. Every interval divides that
/// threshold, so wrapping to zero neither skips nor adds a firing.
#[derive(Debug)]
pub struct Scheduler {
    tasks: Vec<CronSpec>,
    elapsed: u64,
    wrap_at: Option<u64>,
    last_tick: Instant,
}

impl Scheduler {
    pub fn new(tasks: Vec<CronSpec>, wrap_base: u64, start: Instant) -> Self {
        let wrap_at = wrap_threshold(tasks.iter().map(|t| t.interval_seconds), wrap_base);
        tracing::debug!(tasks = tasks.len(), ?wrap_at, "Scheduler created");
        Self {
            tasks,
            elapsed: 0,
            wrap_at,
            last_tick: start,
        }
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed
    }

    /// Value at which `elapsed_seconds` resets to zero, `None` if it never wraps
    pub fn wrap_threshold(&self) -> Option<u64> {
        self.wrap_at
    }

    pub fn tasks(&self) -> &[CronSpec] {
        &self.tasks
    }

    /// Account for all whole seconds passed since the last call and return the
    /// tasks due in that span, each at most once, in registration order.
    ///
    /// The sub-second remainder is carried over to the next call.
    pub fn advance(&mut self, now: Instant) -> Vec<CronSpec> {
        let mut due = vec![false; self.tasks.len()];
        while now.saturating_duration_since(self.last_tick) >= SECOND {
            self.last_tick += SECOND;
            self.step(&mut due);
        }
        self.collect(&due)
    }

    /// Advance exactly one second regardless of wall-clock time.
    pub fn tick(&mut self) -> Vec<CronSpec> {
        let mut due = vec![false; self.tasks.len()];
        self.step(&mut due);
        self.collect(&due)
    }

    fn step(&mut self, due: &mut [bool]) {
        self.elapsed += 1;
        if Some(self.elapsed) == self.wrap_at {
            self.elapsed = 0;
        }
        for (slot, task) in due.iter_mut().zip(&self.tasks) {
            if self.elapsed % task.interval_seconds == 0 {
                *slot = true;
            }
        }
    }

    fn collect(&self, due: &[bool]) -> Vec<CronSpec> {
        self.tasks
            .iter()
            .zip(due)
            .filter(|(_, &is_due)| is_due)
            .map(|(task, _)| task.clone())
            .collect()
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Smallest multiple of lcm(intervals) that is >= base, or `None` on overflow.
fn wrap_threshold(intervals: impl Iterator<Item = u64>, base: u64) -> Option<u64> {
    let mut lcm: u64 = 1;
    for k in intervals {
        lcm = (lcm / gcd(lcm, k)).checked_mul(k)?;
    }
    let multiples = base.div_ceil(lcm).max(1);
    multiples.checked_mul(lcm)
}
