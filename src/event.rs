//! Telemetry event and aggregation record types.
//!
//! A [`RawEvent`] is one timestamped, typed interaction record for a user.
//! Events are immutable once recorded; the aggregation pipeline only ever
//! reads them. A [`FeatureWindow`] is the per-user aggregation result over a
//! trailing time interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of a telemetry event.
///
/// This is an open set: producers may record kinds this crate does not know
/// about, and they round-trip through serialization unchanged. The pipeline
/// only gives special meaning to the variants listed here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Click,
    Keypress,
    AnswerSubmit,
    TabChange,
    CursorMove,
    Input,
    /// An intervention produced by the rule engine, recorded back into the
    /// event stream for the delivery side to pick up.
    ActionSuggested,
    /// Any kind this crate does not interpret.
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Click => "click",
            EventKind::Keypress => "keypress",
            EventKind::AnswerSubmit => "answer_submit",
            EventKind::TabChange => "tab_change",
            EventKind::CursorMove => "cursor_move",
            EventKind::Input => "input",
            EventKind::ActionSuggested => "action_suggested",
            EventKind::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "click" => EventKind::Click,
            "keypress" => EventKind::Keypress,
            "answer_submit" => EventKind::AnswerSubmit,
            "tab_change" => EventKind::TabChange,
            "cursor_move" => EventKind::CursorMove,
            "input" => EventKind::Input,
            "action_suggested" => EventKind::ActionSuggested,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::from(s.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Option<String>,
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    /// Structured, kind-dependent payload. Missing or malformed fields are
    /// treated as absent by the feature extractor.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    /// Create a new event with a fresh id.
    pub fn new(
        user_id: impl Into<String>,
        kind: EventKind,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: None,
            kind,
            payload,
            timestamp,
        }
    }

    /// Lenient view of an `answer_submit` payload.
    ///
    /// Returns `None` for events of any other kind. Individual fields are
    /// `None` when missing or of the wrong JSON type.
    pub fn answer_details(&self) -> Option<AnswerDetails> {
        if self.kind != EventKind::AnswerSubmit {
            return None;
        }
        Some(AnswerDetails {
            correct: self.payload.get("correct").and_then(|v| v.as_bool()),
            time_to_answer_ms: self.payload.get("timeToAnswer").and_then(|v| v.as_f64()),
        })
    }
}

/// Fields the pipeline reads from an `answer_submit` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerDetails {
    pub correct: Option<bool>,
    pub time_to_answer_ms: Option<f64>,
}

/// Auxiliary counts recorded alongside each feature window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMeta {
    pub sample_count: usize,
    pub click_count: usize,
    pub keypress_count: usize,
    pub answer_count: usize,
    pub tab_change_count: usize,
    pub cursor_move_count: usize,
}

/// One aggregation result for one user over one rolling time interval.
///
/// Derived deterministically from the user's raw events with timestamp in
/// `[window_start, window_end]`. Append-only; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWindow {
    pub id: Uuid,
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Mean inter-answer time in milliseconds, or the sparse-activity
    /// fallback when fewer than two answers were seen.
    pub attention_span_ms: Option<f64>,
    /// Signed first-derivative-of-activity proxy.
    pub engagement_slope: f64,
    /// Tab switches plus the cursor-chaos penalty.
    pub cognitive_switch_rate: f64,
    /// Consistency of answer correctness, 0.0 (erratic) to 1.0 (steady).
    pub error_consistency_score: f64,
    pub meta: WindowMeta,
}

/// The output of one matched rule: an intervention to surface to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSuggestion {
    pub rule_id: String,
    pub priority: i32,
    pub action: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_round_trip() {
        let known: EventKind = serde_json::from_str("\"answer_submit\"").unwrap();
        assert_eq!(known, EventKind::AnswerSubmit);
        assert_eq!(serde_json::to_string(&known).unwrap(), "\"answer_submit\"");

        let custom: EventKind = serde_json::from_str("\"scroll_depth\"").unwrap();
        assert_eq!(custom, EventKind::Other("scroll_depth".to_string()));
        assert_eq!(serde_json::to_string(&custom).unwrap(), "\"scroll_depth\"");
    }

    #[test]
    fn test_answer_details_lenient() {
        let ok = RawEvent::new(
            "u1",
            EventKind::AnswerSubmit,
            json!({"correct": false, "timeToAnswer": 450}),
            Utc::now(),
        );
        let details = ok.answer_details().unwrap();
        assert_eq!(details.correct, Some(false));
        assert_eq!(details.time_to_answer_ms, Some(450.0));

        // Wrong JSON types degrade to absence, not errors.
        let malformed = RawEvent::new(
            "u1",
            EventKind::AnswerSubmit,
            json!({"correct": "yes", "timeToAnswer": "fast"}),
            Utc::now(),
        );
        let details = malformed.answer_details().unwrap();
        assert_eq!(details.correct, None);
        assert_eq!(details.time_to_answer_ms, None);
    }

    #[test]
    fn test_answer_details_wrong_kind() {
        let click = RawEvent::new("u1", EventKind::Click, json!({}), Utc::now());
        assert!(click.answer_details().is_none());
    }
}
