//! Timeout primitives for timed I/O phases and the sliding idle deadline.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{self, Instant};

/// One-shot timer guarding a single cancellable operation.
///
/// A `Watchdog` distinguishes "the operation expired" from "the operation
/// failed": [`watch`](Watchdog::watch) drops the in-flight future when the
/// armed deadline passes and yields `None`, and [`expired`](Watchdog::expired)
/// keeps reporting the cause afterwards. Re-arm it between attempts within a
/// phase; do not share one across phases.
#[derive(Debug)]
pub struct Watchdog {
    deadline: Instant,
    expired: bool,
}

impl Watchdog {
    /// Create an unarmed watchdog. [`arm`](Watchdog::arm) must be called
    /// before [`watch`](Watchdog::watch), otherwise the first watch expires
    /// immediately.
    pub fn new() -> Self {
        Self {
            deadline: Instant::now(),
            expired: false,
        }
    }

    /// Clear the expired flag and schedule the deadline `interval` from now.
    pub fn arm(&mut self, interval: Duration) {
        self.deadline = Instant::now() + interval;
        self.expired = false;
    }

    /// Whether the last watched operation was cut short by the timer.
    pub fn expired(&self) -> bool {
        self.expired
    }

    /// Await `op` under the armed deadline.
    ///
    /// Returns `Some(output)` if the operation resolves first. If the timer
    /// fires first the operation is dropped mid-flight and `None` is
    /// returned, with [`expired`](Watchdog::expired) set.
    pub async fn watch<F: Future>(&mut self, op: F) -> Option<F::Output> {
        match time::timeout_at(self.deadline, op).await {
            Ok(output) => Some(output),
            Err(_) => {
                self.expired = true;
                None
            }
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding wall-clock deadline shared by the tunnel transfer tasks.
///
/// Both copy directions re-arm it before every read and write; a waiter task
/// sleeps on [`wait`](Deadline::wait). The deadline is stored as nanoseconds
/// past a fixed epoch in an atomic, so arming from one task and polling from
/// another needs no lock.
#[derive(Debug)]
pub struct Deadline {
    epoch: Instant,
    armed_until: AtomicU64,
}

impl Deadline {
    /// Create an unarmed deadline. An unarmed deadline reads as already
    /// expired; [`arm`](Deadline::arm) before waiting on it.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            armed_until: AtomicU64::new(0),
        }
    }

    /// Move the deadline to `interval` from now, replacing any earlier value.
    pub fn arm(&self, interval: Duration) {
        let until = self.epoch.elapsed() + interval;
        self.armed_until
            .store(until.as_nanos() as u64, Ordering::Relaxed);
    }

    /// The instant the deadline currently expires at.
    pub fn expiry(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.armed_until.load(Ordering::Relaxed))
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.expiry()
    }

    /// Resolve once the deadline has genuinely passed.
    ///
    /// Sleeps until the current expiry; if the deadline was extended in the
    /// meantime, re-sleeps until the new one.
    pub async fn wait(&self) {
        while !self.expired() {
            time::sleep_until(self.expiry()).await;
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}
