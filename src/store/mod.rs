//! Event store seam.
//!
//! The durable store is an external collaborator; the pipeline only requires
//! the operations on [`EventStore`]. The bundled [`MemoryStore`] backs the
//! binary, the replay command, and the test suite; a durable backend
//! substitutes here without touching the pipeline.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::{FeatureWindow, RawEvent};

/// Errors surfaced by a store backend.
///
/// All variants are treated as transient by the pipeline: the affected user
/// (or tick) is skipped and retried on the next scheduled cycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Ordered, timestamped, queryable event storage.
///
/// Implementations must return a user's events ordered by timestamp with ties
/// broken by insertion order; the feature extractor depends on it.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Cheap liveness probe, used by startup readiness waits.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Append one immutable event.
    async fn append(&self, event: RawEvent) -> Result<(), StoreError>;

    /// Distinct user ids with at least one event at or after `since`.
    async fn active_users(&self, since: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    /// One user's events with timestamp in `[from, to]`, ordered by
    /// `(timestamp, insertion order)`.
    async fn events_for_user(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, StoreError>;

    /// Persist one aggregation result. Append-only.
    async fn append_feature_window(&self, window: FeatureWindow) -> Result<(), StoreError>;

    /// A user's `action_suggested` events at or after `since`, newest first,
    /// at most `limit`.
    async fn actions_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawEvent>, StoreError>;

    /// All `action_suggested` events at or after `since`, across users, in
    /// recording order. Used by the delivery dispatcher.
    async fn recent_actions(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>, StoreError>;
}
