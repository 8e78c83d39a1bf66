//! Aggregation pipeline counters.
//!
//! Cheap atomic counters exposed for status output and tests. No per-user
//! data is held here, only totals for the current process.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug)]
pub struct PipelineStats {
    cycles_run: AtomicU64,
    ticks_skipped: AtomicU64,
    users_scanned: AtomicU64,
    windows_computed: AtomicU64,
    actions_emitted: AtomicU64,
    user_failures: AtomicU64,
    started: DateTime<Utc>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            cycles_run: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            users_scanned: AtomicU64::new(0),
            windows_computed: AtomicU64::new(0),
            actions_emitted: AtomicU64::new(0),
            user_failures: AtomicU64::new(0),
            started: Utc::now(),
        }
    }

    pub fn record_cycle(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_users_scanned(&self, count: u64) {
        self.users_scanned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_window_computed(&self) {
        self.windows_computed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_actions_emitted(&self, count: u64) {
        self.actions_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_user_failure(&self) {
        self.user_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            users_scanned: self.users_scanned.load(Ordering::Relaxed),
            windows_computed: self.windows_computed.load(Ordering::Relaxed),
            actions_emitted: self.actions_emitted.load(Ordering::Relaxed),
            user_failures: self.user_failures.load(Ordering::Relaxed),
            uptime_secs: (Utc::now() - self.started).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable totals for shutdown output.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Aggregation totals:\n\
             - Cycles run: {}\n\
             - Ticks skipped (overlap): {}\n\
             - Users scanned: {}\n\
             - Feature windows computed: {}\n\
             - Actions emitted: {}\n\
             - Per-user failures: {}\n\
             - Uptime: {} seconds",
            s.cycles_run,
            s.ticks_skipped,
            s.users_scanned,
            s.windows_computed,
            s.actions_emitted,
            s.user_failures,
            s.uptime_secs
        )
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub cycles_run: u64,
    pub ticks_skipped: u64,
    pub users_scanned: u64,
    pub windows_computed: u64,
    pub actions_emitted: u64,
    pub user_failures: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = PipelineStats::new();
        stats.record_cycle();
        stats.record_users_scanned(3);
        stats.record_window_computed();
        stats.record_window_computed();
        stats.record_actions_emitted(5);
        stats.record_user_failure();
        stats.record_tick_skipped();

        let s = stats.snapshot();
        assert_eq!(s.cycles_run, 1);
        assert_eq!(s.users_scanned, 3);
        assert_eq!(s.windows_computed, 2);
        assert_eq!(s.actions_emitted, 5);
        assert_eq!(s.user_failures, 1);
        assert_eq!(s.ticks_skipped, 1);
    }

    #[test]
    fn test_summary_mentions_totals() {
        let stats = PipelineStats::new();
        stats.record_actions_emitted(7);
        let summary = stats.summary();
        assert!(summary.contains("Actions emitted: 7"));
    }
}
