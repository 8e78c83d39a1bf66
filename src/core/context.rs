//! Evaluation context assembly.

use std::collections::BTreeMap;

use crate::core::features::{WindowFeatures, WindowObservations};

/// Everything a rule condition can see for one user and one window.
///
/// Built fresh each cycle per user and owned by the driver for the duration
/// of that user's evaluation; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub engagement_slope: f64,
    pub cognitive_switch_rate: f64,
    pub consecutive_wrong: u32,
    pub decreasing_time_to_answer: bool,
    /// Cut-points for the percentile names the catalog references, resolved
    /// from the user's rolling history (or the seed table).
    pub percentile_thresholds: BTreeMap<String, f64>,
}

impl EvaluationContext {
    pub fn new(
        features: &WindowFeatures,
        observations: &WindowObservations,
        percentile_thresholds: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            engagement_slope: features.engagement_slope,
            cognitive_switch_rate: features.cognitive_switch_rate,
            consecutive_wrong: observations.consecutive_wrong,
            decreasing_time_to_answer: observations.decreasing_time_to_answer,
            percentile_thresholds,
        }
    }

    /// The resolved cut-point for a named percentile, if any.
    pub fn threshold(&self, name: &str) -> Option<f64> {
        self.percentile_thresholds.get(name).copied()
    }
}
