//! Rule evaluation.
//!
//! A pure function over a context and a catalog: no I/O, no side effects,
//! safe to call repeatedly and concurrently. Matching is a conjunction over
//! the predicates present in each rule's condition.

use std::cmp::Reverse;

use crate::core::EvaluationContext;
use crate::event::ActionSuggestion;
use crate::rules::catalog::{Condition, RuleCatalog};

/// Evaluate every rule against the context.
///
/// Returns one suggestion per matching rule, sorted by priority descending.
/// The sort is stable: rules of equal priority keep catalog order, which
/// downstream delivery relies on.
pub fn evaluate(catalog: &RuleCatalog, ctx: &EvaluationContext) -> Vec<ActionSuggestion> {
    let mut suggestions: Vec<ActionSuggestion> = catalog
        .rules()
        .iter()
        .filter(|rule| condition_holds(&rule.condition, ctx))
        .map(|rule| ActionSuggestion {
            rule_id: rule.id.clone(),
            priority: rule.priority,
            action: rule.action.clone(),
        })
        .collect();
    suggestions.sort_by_key(|s| Reverse(s.priority));
    suggestions
}

fn condition_holds(condition: &Condition, ctx: &EvaluationContext) -> bool {
    if let Some(threshold) = condition.engagement_slope_lt {
        if !(ctx.engagement_slope < threshold) {
            return false;
        }
    }
    if let Some(name) = &condition.cognitive_switch_rate_gt_percentile {
        match ctx.threshold(name) {
            Some(cut) => {
                if !(ctx.cognitive_switch_rate > cut) {
                    return false;
                }
            }
            None => {
                // No distribution to cut: the predicate fails rather than
                // silently matching.
                tracing::debug!(percentile = %name, "no threshold resolved; predicate fails");
                return false;
            }
        }
    }
    if let Some(required) = condition.consecutive_wrong {
        if ctx.consecutive_wrong < required {
            return false;
        }
    }
    if condition.decreasing_time_to_answer == Some(true) && !ctx.decreasing_time_to_answer {
        return false;
    }
    true
}
