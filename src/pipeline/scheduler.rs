//! Periodic scheduling with a single-flight guard.
//!
//! The aggregation loop must never run two ticks concurrently: overlapping
//! cycles would double-compute feature windows and double-emit actions for
//! the same interval. The guard makes that invariant explicit and testable
//! apart from the loop itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::pipeline::driver::CycleDriver;

/// Mutual exclusion for one in-flight cycle.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flight slot. Returns `None` while a permit is outstanding.
    pub fn try_acquire(&self) -> Option<FlightPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| FlightPermit { flag: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the slot on drop.
#[derive(Debug)]
pub struct FlightPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Drive aggregation cycles at a fixed interval until cancelled.
///
/// A tick that comes due while the previous cycle is still running is
/// skipped (counted, logged at debug), never run concurrently.
pub async fn run(driver: Arc<CycleDriver>, tick: Duration, cancel: CancellationToken) {
    let guard = SingleFlight::new();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(tick_ms = tick.as_millis() as u64, "aggregation loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match guard.try_acquire() {
                    Some(_permit) => driver.run_cycle(Utc::now()).await,
                    None => {
                        driver.stats().record_tick_skipped();
                        tracing::debug!("previous cycle still running; tick skipped");
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("aggregation loop shutting down");
                break;
            }
        }
    }
}
