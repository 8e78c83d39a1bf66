//! In-memory event store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::event::{EventKind, FeatureWindow, RawEvent};
use crate::store::{EventStore, StoreError};

/// An event plus the insertion sequence number that breaks timestamp ties.
#[derive(Debug, Clone)]
struct StoredEvent {
    seq: u64,
    event: RawEvent,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<StoredEvent>,
    windows: Vec<FeatureWindow>,
    next_seq: u64,
}

/// Event store backed by process memory.
///
/// Suitable for tests, replays, and single-process deployments where
/// durability is handled elsewhere. Total order is `(timestamp, insertion)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events currently held.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// All persisted feature windows for one user, in insertion order.
    pub async fn feature_windows_for_user(&self, user_id: &str) -> Vec<FeatureWindow> {
        self.inner
            .read()
            .await
            .windows
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn append(&self, event: RawEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.events.push(StoredEvent { seq, event });
        Ok(())
    }

    async fn active_users(&self, since: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let users: BTreeSet<&str> = inner
            .events
            .iter()
            .filter(|s| s.event.timestamp >= since)
            .map(|s| s.event.user_id.as_str())
            .collect();
        Ok(users.into_iter().map(str::to_string).collect())
    }

    async fn events_for_user(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, StoreError> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&StoredEvent> = inner
            .events
            .iter()
            .filter(|s| {
                s.event.user_id == user_id && s.event.timestamp >= from && s.event.timestamp <= to
            })
            .collect();
        matched.sort_by_key(|s| (s.event.timestamp, s.seq));
        Ok(matched.into_iter().map(|s| s.event.clone()).collect())
    }

    async fn append_feature_window(&self, window: FeatureWindow) -> Result<(), StoreError> {
        self.inner.write().await.windows.push(window);
        Ok(())
    }

    async fn actions_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawEvent>, StoreError> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&StoredEvent> = inner
            .events
            .iter()
            .filter(|s| {
                s.event.user_id == user_id
                    && s.event.kind == EventKind::ActionSuggested
                    && s.event.timestamp >= since
            })
            .collect();
        matched.sort_by_key(|s| (s.event.timestamp, s.seq));
        matched.reverse();
        matched.truncate(limit);
        Ok(matched.into_iter().map(|s| s.event.clone()).collect())
    }

    async fn recent_actions(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>, StoreError> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&StoredEvent> = inner
            .events
            .iter()
            .filter(|s| s.event.kind == EventKind::ActionSuggested && s.event.timestamp >= since)
            .collect();
        matched.sort_by_key(|s| (s.event.timestamp, s.seq));
        Ok(matched.into_iter().map(|s| s.event.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn event_at(user: &str, kind: EventKind, ts: DateTime<Utc>) -> RawEvent {
        RawEvent::new(user, kind, json!({}), ts)
    }

    #[tokio::test]
    async fn test_active_users_respects_lookback() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .append(event_at("fresh", EventKind::Click, now))
            .await
            .unwrap();
        store
            .append(event_at("stale", EventKind::Click, now - Duration::seconds(120)))
            .await
            .unwrap();

        let users = store.active_users(now - Duration::seconds(40)).await.unwrap();
        assert_eq!(users, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let store = MemoryStore::new();
        let ts = Utc::now();

        let first = event_at("u1", EventKind::Click, ts);
        let second = event_at("u1", EventKind::Keypress, ts);
        store.append(first.clone()).await.unwrap();
        store.append(second.clone()).await.unwrap();

        let events = store
            .events_for_user("u1", ts - Duration::seconds(1), ts + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, first.id);
        assert_eq!(events[1].id, second.id);
    }

    #[tokio::test]
    async fn test_window_query_is_inclusive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let from = now - Duration::seconds(20);

        store.append(event_at("u1", EventKind::Click, from)).await.unwrap();
        store.append(event_at("u1", EventKind::Click, now)).await.unwrap();
        store
            .append(event_at("u1", EventKind::Click, from - Duration::milliseconds(1)))
            .await
            .unwrap();

        let events = store.events_for_user("u1", from, now).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_actions_newest_first_with_limit() {
        let store = MemoryStore::new();
        let now = Utc::now();

        for i in 0..5 {
            let mut e = event_at("u1", EventKind::ActionSuggested, now + Duration::seconds(i));
            e.payload = json!({"rule_id": format!("r{i}")});
            store.append(e).await.unwrap();
        }

        let actions = store
            .actions_for_user("u1", now, 3)
            .await
            .unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].payload["rule_id"], "r4");
        assert_eq!(actions[2].payload["rule_id"], "r2");
    }
}
