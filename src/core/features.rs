//! Feature derivation from one user's in-window events.
//!
//! All functions here are pure over an ordered event slice: callers supply
//! the events of a single user whose timestamps fall inside the rolling
//! window, ordered by timestamp (ties broken by insertion order). Malformed
//! payload fields are treated as absent per feature and never fail a window.

use std::time::Duration;

use crate::event::{AnswerDetails, EventKind, RawEvent, WindowMeta};

/// Cursor-move count above which the window is considered chaotic.
/// The boundary is strict: exactly this many moves adds no penalty.
const CURSOR_CHAOS_THRESHOLD: usize = 30;

/// Fixed addition to the switch rate when the cursor-chaos threshold trips.
const CURSOR_CHAOS_PENALTY: f64 = 2.0;

/// Minimum `answer_submit` events before the time-to-answer trend can fire.
const ANSWER_TREND_SPAN: usize = 3;

/// Derived metrics persisted with each feature window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFeatures {
    pub attention_span_ms: Option<f64>,
    pub engagement_slope: f64,
    pub cognitive_switch_rate: f64,
    pub error_consistency_score: f64,
    pub meta: WindowMeta,
}

/// Context-only values derived alongside the features; consumed by rule
/// evaluation for the same window and never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowObservations {
    /// Clicks + keypresses + answers in the window.
    pub interaction_count: usize,
    /// Count of all wrong answers in the window (not a trailing streak).
    pub consecutive_wrong: u32,
    /// True when the last three answers were strictly speeding up.
    pub decreasing_time_to_answer: bool,
}

/// Compute all features and observations for one window.
pub fn extract(events: &[RawEvent], window_len: Duration) -> (WindowFeatures, WindowObservations) {
    let meta = count_kinds(events);
    let interaction_count = meta.click_count + meta.keypress_count + meta.answer_count;

    let answers: Vec<&RawEvent> = events
        .iter()
        .filter(|e| e.kind == EventKind::AnswerSubmit)
        .collect();
    let details: Vec<AnswerDetails> = answers.iter().filter_map(|e| e.answer_details()).collect();

    let features = WindowFeatures {
        attention_span_ms: Some(attention_span_ms(&answers, interaction_count, window_len)),
        engagement_slope: engagement_slope(events.len(), window_len),
        cognitive_switch_rate: cognitive_switch_rate(&meta),
        error_consistency_score: error_consistency_score(&details),
        meta,
    };

    let observations = WindowObservations {
        interaction_count,
        consecutive_wrong: details.iter().filter(|d| d.correct == Some(false)).count() as u32,
        decreasing_time_to_answer: decreasing_time_to_answer(&details),
    };

    (features, observations)
}

fn count_kinds(events: &[RawEvent]) -> WindowMeta {
    let mut meta = WindowMeta {
        sample_count: events.len(),
        ..WindowMeta::default()
    };
    for event in events {
        match event.kind {
            EventKind::Click => meta.click_count += 1,
            EventKind::Keypress => meta.keypress_count += 1,
            EventKind::AnswerSubmit => meta.answer_count += 1,
            EventKind::TabChange => meta.tab_change_count += 1,
            EventKind::CursorMove => meta.cursor_move_count += 1,
            _ => {}
        }
    }
    meta
}

/// Mean of consecutive inter-answer deltas when at least two answers exist.
///
/// With fewer than two answers the span decays with overall activity:
/// `W_ms / max(1, interaction_count)`. An idle window reads as the full
/// window duration, a rapid-fire window as a short span. The fallback is a
/// deliberate default, not a missing-data placeholder.
fn attention_span_ms(answers: &[&RawEvent], interaction_count: usize, window_len: Duration) -> f64 {
    if answers.len() >= 2 {
        let mut times: Vec<i64> = answers
            .iter()
            .map(|a| a.timestamp.timestamp_millis())
            .collect();
        times.sort_unstable();
        let deltas: Vec<f64> = times.windows(2).map(|p| (p[1] - p[0]) as f64).collect();
        deltas.iter().sum::<f64>() / deltas.len() as f64
    } else {
        window_len.as_millis() as f64 / interaction_count.max(1) as f64
    }
}

/// Positional half-split activity delta, scaled by the window length.
///
/// The split is by event position (first `n/2` events vs the remainder), not
/// by time bucket.
fn engagement_slope(event_count: usize, window_len: Duration) -> f64 {
    let first = event_count / 2;
    let second = event_count - first;
    (second as f64 - first as f64) / window_len.as_secs().max(1) as f64
}

/// Tab switches plus a step penalty for cursor chaos.
fn cognitive_switch_rate(meta: &WindowMeta) -> f64 {
    let penalty = if meta.cursor_move_count > CURSOR_CHAOS_THRESHOLD {
        CURSOR_CHAOS_PENALTY
    } else {
        0.0
    };
    meta.tab_change_count as f64 + penalty
}

/// Consistency of answer correctness over the window's graded answers.
///
/// `1 - flips / (graded - 1)`, where a flip is an adjacent pair of graded
/// answers with differing correctness. A user who is steadily right (or
/// steadily wrong) scores 1.0; strict alternation scores 0.0. Fewer than two
/// graded answers carry no evidence of inconsistency and score 1.0.
fn error_consistency_score(details: &[AnswerDetails]) -> f64 {
    let graded: Vec<bool> = details.iter().filter_map(|d| d.correct).collect();
    if graded.len() < 2 {
        return 1.0;
    }
    let flips = graded.windows(2).filter(|p| p[0] != p[1]).count();
    1.0 - flips as f64 / (graded.len() - 1) as f64
}

/// True iff the last three answers in window order all recorded a
/// time-to-answer and those values are strictly decreasing.
fn decreasing_time_to_answer(details: &[AnswerDetails]) -> bool {
    if details.len() < ANSWER_TREND_SPAN {
        return false;
    }
    let last3 = &details[details.len() - ANSWER_TREND_SPAN..];
    let times: Vec<f64> = last3.iter().filter_map(|d| d.time_to_answer_ms).collect();
    if times.len() < ANSWER_TREND_SPAN {
        return false;
    }
    times[0] > times[1] && times[1] > times[2]
}
