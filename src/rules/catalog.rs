//! Declarative rule catalog.
//!
//! Rules are loaded once at process start from a JSON file and are immutable
//! for the process lifetime; reloading means restarting. Validation happens
//! at load so evaluation never meets a malformed rule.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors detected while loading or validating a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    /// Also covers unknown predicate keys, which serde rejects.
    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate rule id: {0}")]
    DuplicateRuleId(String),

    #[error("rule {rule_id}: percentile name {name:?} is not an integer in 1..=99")]
    InvalidPercentile { rule_id: String, name: String },
}

/// The named predicates a rule may combine. All present predicates must hold
/// for the rule to match; absent ones are vacuously satisfied.
///
/// Unknown keys are a load-time error rather than a silent match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// Matches when the context's engagement slope is below this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement_slope_lt: Option<f64>,

    /// Matches when the switch rate exceeds the named percentile cut-point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cognitive_switch_rate_gt_percentile: Option<String>,

    /// Matches when at least this many wrong answers were seen in-window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_wrong: Option<u32>,

    /// When `true`, requires the speeding-up answer trend. A literal `false`
    /// is vacuous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decreasing_time_to_answer: Option<bool>,
}

/// One declarative condition-to-action mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    /// Higher is more urgent.
    pub priority: i32,
    pub condition: Condition,
    /// Opaque intervention payload, delivered verbatim.
    pub action: serde_json::Value,
}

/// An immutable, validated set of rules. Safe for unsynchronized concurrent
/// reads; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    rules: Vec<Rule>,
}

impl RuleCatalog {
    /// Validate and wrap a rule list, preserving its order.
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(CatalogError::DuplicateRuleId(rule.id.clone()));
            }
            if let Some(name) = &rule.condition.cognitive_switch_rate_gt_percentile {
                let valid = matches!(name.parse::<usize>(), Ok(p) if (1..=99).contains(&p));
                if !valid {
                    return Err(CatalogError::InvalidPercentile {
                        rule_id: rule.id.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(Self { rules })
    }

    /// Parse a JSON array of rules.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let rules: Vec<Rule> = serde_json::from_str(json)?;
        Self::from_rules(rules)
    }

    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Rules in catalog order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The distinct percentile names any rule's condition references.
    pub fn referenced_percentiles(&self) -> BTreeSet<String> {
        self.rules
            .iter()
            .filter_map(|r| r.condition.cognitive_switch_rate_gt_percentile.clone())
            .collect()
    }
}
