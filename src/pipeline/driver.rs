//! Aggregation cycle driver.
//!
//! One cycle scans the active user set and, for each user independently:
//! fetch window events, extract features, persist the feature window, build
//! the evaluation context, evaluate rules, emit actions. A failing or stuck
//! user is logged and skipped; the cycle always completes for the others.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use uuid::Uuid;

use crate::core::{extract, EvaluationContext, SwitchRateTracker, DEFAULT_HISTORY_CAP};
use crate::event::FeatureWindow;
use crate::pipeline::emitter::ActionEmitter;
use crate::pipeline::stats::PipelineStats;
use crate::rules::{evaluate, RuleCatalog};
use crate::store::{EventStore, StoreError};

/// Tunables of the aggregation cycle.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Rolling feature window length W.
    pub window: Duration,
    /// Active-user lookback as a multiple of W.
    pub lookback_factor: u32,
    /// Budget for one user's fetch-compute-persist sequence.
    pub user_timeout: Duration,
    /// Retained switch-rate samples per user.
    pub percentile_history: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(20),
            lookback_factor: 2,
            user_timeout: Duration::from_secs(3),
            percentile_history: DEFAULT_HISTORY_CAP,
        }
    }
}

pub struct CycleDriver {
    store: Arc<dyn EventStore>,
    catalog: Arc<RuleCatalog>,
    settings: PipelineSettings,
    emitter: ActionEmitter,
    /// Percentile names the catalog references, resolved once at startup.
    percentile_names: BTreeSet<String>,
    tracker: Mutex<SwitchRateTracker>,
    stats: Arc<PipelineStats>,
}

impl CycleDriver {
    pub fn new(
        store: Arc<dyn EventStore>,
        catalog: Arc<RuleCatalog>,
        settings: PipelineSettings,
    ) -> Self {
        let percentile_names = catalog.referenced_percentiles();
        let tracker = Mutex::new(SwitchRateTracker::new(settings.percentile_history));
        Self {
            emitter: ActionEmitter::new(store.clone()),
            store,
            catalog,
            settings,
            percentile_names,
            tracker,
            stats: Arc::new(PipelineStats::new()),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn stats_handle(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    fn window_chrono(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.settings.window.as_millis() as i64)
    }

    /// Run one aggregation cycle at `now`.
    ///
    /// Never returns an error: a failed user scan means the whole tick is
    /// retried on the next schedule, and per-user failures are isolated.
    pub async fn run_cycle(&self, now: DateTime<Utc>) {
        self.stats.record_cycle();

        let lookback = self.window_chrono() * self.settings.lookback_factor as i32;
        let users = match self.store.active_users(now - lookback).await {
            Ok(users) => users,
            Err(error) => {
                tracing::error!(%error, "active-user scan failed; retrying next tick");
                return;
            }
        };
        self.stats.record_users_scanned(users.len() as u64);

        for user_id in users {
            match timeout(self.settings.user_timeout, self.process_user(&user_id, now)).await {
                Ok(Ok(actions)) => {
                    tracing::debug!(user = %user_id, actions, "user window evaluated");
                }
                Ok(Err(error)) => {
                    self.stats.record_user_failure();
                    tracing::warn!(user = %user_id, %error, "user skipped this tick");
                }
                Err(_) => {
                    self.stats.record_user_failure();
                    tracing::warn!(
                        user = %user_id,
                        budget_ms = self.settings.user_timeout.as_millis() as u64,
                        "user processing timed out; skipped this tick"
                    );
                }
            }
        }
    }

    /// Steps 1-6 for one user. Strictly sequential; each step depends on the
    /// previous one's output.
    async fn process_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let window_start = now - self.window_chrono();
        let events = self
            .store
            .events_for_user(user_id, window_start, now)
            .await?;

        let (features, observations) = extract(&events, self.settings.window);

        let window = FeatureWindow {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            window_start,
            window_end: now,
            attention_span_ms: features.attention_span_ms,
            engagement_slope: features.engagement_slope,
            cognitive_switch_rate: features.cognitive_switch_rate,
            error_consistency_score: features.error_consistency_score,
            meta: features.meta.clone(),
        };
        self.store.append_feature_window(window).await?;
        self.stats.record_window_computed();

        let thresholds = {
            let mut tracker = self
                .tracker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tracker.record(user_id, features.cognitive_switch_rate);
            tracker.thresholds(user_id, &self.percentile_names)
        };

        let ctx = EvaluationContext::new(&features, &observations, thresholds);
        let suggestions = evaluate(&self.catalog, &ctx);

        let emitted = self.emitter.emit(user_id, &suggestions, now).await?;
        self.stats.record_actions_emitted(emitted as u64);
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, RawEvent};
    use crate::rules::{Condition, Rule};
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn answer(user: &str, at: DateTime<Utc>, correct: bool, time_to_answer: f64) -> RawEvent {
        RawEvent::new(
            user,
            EventKind::AnswerSubmit,
            json!({"correct": correct, "timeToAnswer": time_to_answer}),
            at,
        )
    }

    fn catalog(rules: Vec<Rule>) -> Arc<RuleCatalog> {
        Arc::new(RuleCatalog::from_rules(rules).unwrap())
    }

    #[tokio::test]
    async fn test_cycle_persists_window_and_emits_actions() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        store.append(answer("u1", now - ChronoDuration::seconds(10), false, 500.0)).await.unwrap();
        store.append(answer("u1", now - ChronoDuration::seconds(5), false, 300.0)).await.unwrap();
        store.append(answer("u1", now, true, 100.0)).await.unwrap();

        let catalog = catalog(vec![Rule {
            id: "struggling".to_string(),
            priority: 30,
            condition: Condition {
                consecutive_wrong: Some(2),
                ..Condition::default()
            },
            action: json!({"kind": "offer_hint"}),
        }]);

        let driver = CycleDriver::new(store.clone(), catalog, PipelineSettings::default());
        driver.run_cycle(now).await;

        let windows = store.feature_windows_for_user("u1").await;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].attention_span_ms, Some(5000.0));
        assert_eq!(windows[0].meta.answer_count, 3);

        let actions = store.actions_for_user("u1", now, 10).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].payload["rule_id"], "struggling");
    }

    #[tokio::test]
    async fn test_inactive_users_are_not_processed() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        // Last event far outside the 2xW lookback.
        store
            .append(answer("gone", now - ChronoDuration::seconds(300), true, 100.0))
            .await
            .unwrap();

        let driver = CycleDriver::new(
            store.clone(),
            catalog(vec![]),
            PipelineSettings::default(),
        );
        driver.run_cycle(now).await;

        assert!(store.feature_windows_for_user("gone").await.is_empty());
        assert_eq!(driver.stats().snapshot().users_scanned, 0);
    }

    #[tokio::test]
    async fn test_lookback_user_gets_degenerate_window() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        // Inside the 40s lookback but outside the 20s feature window.
        store
            .append(answer("idle", now - ChronoDuration::seconds(30), true, 100.0))
            .await
            .unwrap();

        let driver = CycleDriver::new(
            store.clone(),
            catalog(vec![]),
            PipelineSettings::default(),
        );
        driver.run_cycle(now).await;

        let windows = store.feature_windows_for_user("idle").await;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].meta.sample_count, 0);
        // Empty window reads as the full window duration.
        assert_eq!(windows[0].attention_span_ms, Some(20_000.0));
    }

    #[tokio::test]
    async fn test_two_cycles_emit_duplicate_actions() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.append(answer("u1", now, false, 500.0)).await.unwrap();

        let catalog = catalog(vec![Rule {
            id: "any-wrong".to_string(),
            priority: 1,
            condition: Condition {
                consecutive_wrong: Some(1),
                ..Condition::default()
            },
            action: json!({}),
        }]);
        let driver = CycleDriver::new(store.clone(), catalog, PipelineSettings::default());

        driver.run_cycle(now).await;
        driver.run_cycle(now).await;

        // Re-evaluating the same interval re-emits; duplicates are tolerated
        // downstream.
        let actions = store.actions_for_user("u1", now, 10).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(store.feature_windows_for_user("u1").await.len(), 2);
    }
}
