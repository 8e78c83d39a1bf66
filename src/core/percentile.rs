//! Rolling per-user metric distributions.
//!
//! Rule conditions of the form "metric above the Nth percentile" need a
//! distribution to cut. Each user carries a bounded history of switch-rate
//! samples; percentiles are computed on demand from that history. Until a
//! user has accumulated enough samples, a static seed table stands in so the
//! condition stays evaluable from the first tick.

use std::collections::{BTreeMap, HashMap, VecDeque};

use statrs::statistics::{Data, OrderStatistics};

/// Retained samples per user and metric.
pub const DEFAULT_HISTORY_CAP: usize = 256;

/// Samples required before computed percentiles replace the seed table.
pub const MIN_SAMPLES: usize = 8;

/// Seed cut-points used while a user's history is too short.
pub fn seed_thresholds() -> BTreeMap<String, f64> {
    BTreeMap::from([("75".to_string(), 5.0)])
}

/// Bounded rolling history of one metric.
#[derive(Debug, Clone)]
pub struct MetricHistory {
    samples: VecDeque<f64>,
    cap: usize,
}

impl MetricHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap.min(64)),
            cap: cap.max(1),
        }
    }

    pub fn record(&mut self, value: f64) {
        self.samples.push_back(value);
        while self.samples.len() > self.cap {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The `tau`-th percentile of the recorded samples, or `None` while the
    /// history is below [`MIN_SAMPLES`].
    pub fn percentile(&self, tau: usize) -> Option<f64> {
        if self.samples.len() < MIN_SAMPLES {
            return None;
        }
        let mut data = Data::new(self.samples.iter().copied().collect::<Vec<f64>>());
        Some(data.percentile(tau))
    }
}

/// Per-user rolling history of the cognitive switch rate.
#[derive(Debug)]
pub struct SwitchRateTracker {
    histories: HashMap<String, MetricHistory>,
    cap: usize,
}

impl SwitchRateTracker {
    pub fn new(cap: usize) -> Self {
        Self {
            histories: HashMap::new(),
            cap,
        }
    }

    /// Record one window's switch rate for a user.
    pub fn record(&mut self, user_id: &str, value: f64) {
        self.histories
            .entry(user_id.to_string())
            .or_insert_with(|| MetricHistory::new(self.cap))
            .record(value);
    }

    /// Resolve the cut-points for the percentile names a catalog references.
    ///
    /// Names must already be validated as integer percentiles (the catalog
    /// does this at load time). Any name whose computed value is unavailable
    /// falls back to the seed table; names missing from both are omitted,
    /// which deterministically fails the predicates that need them.
    pub fn thresholds<'a>(
        &self,
        user_id: &str,
        names: impl IntoIterator<Item = &'a String>,
    ) -> BTreeMap<String, f64> {
        let seeds = seed_thresholds();
        let history = self.histories.get(user_id);
        let mut table = BTreeMap::new();
        for name in names {
            let computed = name
                .parse::<usize>()
                .ok()
                .and_then(|tau| history.and_then(|h| h.percentile(tau)));
            if let Some(value) = computed.or_else(|| seeds.get(name).copied()) {
                table.insert(name.clone(), value);
            }
        }
        table
    }

    /// Number of users with recorded history.
    pub fn user_count(&self) -> usize {
        self.histories.len()
    }
}

impl Default for SwitchRateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = MetricHistory::new(4);
        for i in 0..10 {
            history.record(i as f64);
        }
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_percentile_requires_min_samples() {
        let mut history = MetricHistory::new(64);
        for i in 0..(MIN_SAMPLES - 1) {
            history.record(i as f64);
        }
        assert_eq!(history.percentile(75), None);

        history.record(99.0);
        assert!(history.percentile(75).is_some());
    }

    #[test]
    fn test_tracker_falls_back_to_seed() {
        let tracker = SwitchRateTracker::default();
        let names = vec!["75".to_string()];
        let table = tracker.thresholds("nobody", &names);
        assert_eq!(table.get("75"), Some(&5.0));
    }

    #[test]
    fn test_tracker_computes_from_history() {
        let mut tracker = SwitchRateTracker::default();
        for i in 1..=20 {
            tracker.record("u1", i as f64);
        }
        let names = vec!["75".to_string()];
        let table = tracker.thresholds("u1", &names);
        let p75 = table["75"];
        assert!(p75 > 10.0 && p75 <= 20.0, "p75 out of range: {p75}");
    }

    #[test]
    fn test_unresolvable_name_is_omitted() {
        let tracker = SwitchRateTracker::default();
        let names = vec!["90".to_string()];
        // No history and no seed for "90": the name is absent from the table.
        let table = tracker.thresholds("u1", &names);
        assert!(table.is_empty());
    }

    #[test]
    fn test_histories_are_per_user() {
        let mut tracker = SwitchRateTracker::default();
        for _ in 0..20 {
            tracker.record("busy", 10.0);
        }
        tracker.record("quiet", 0.0);

        let names = vec!["75".to_string()];
        assert_eq!(tracker.thresholds("busy", &names)["75"], 10.0);
        // "quiet" has too little history and falls back to the seed.
        assert_eq!(tracker.thresholds("quiet", &names)["75"], 5.0);
        assert_eq!(tracker.user_count(), 2);
    }
}
