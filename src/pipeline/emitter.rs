//! Action emission.
//!
//! Suggestions are recorded back into the event stream as `action_suggested`
//! events, closing the loop for the delivery side to observe. The record is
//! append-only; duplicate emissions for the same interval are tolerated by
//! the delivery contract.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event::{ActionSuggestion, EventKind, RawEvent};
use crate::store::{EventStore, StoreError};

pub struct ActionEmitter {
    store: Arc<dyn EventStore>,
}

impl ActionEmitter {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Record each suggestion as a durable event for `user_id`.
    ///
    /// Returns the number of records written. Fails fast on the first store
    /// error; already-written records stay (duplicates are acceptable when
    /// the caller retries next tick).
    pub async fn emit(
        &self,
        user_id: &str,
        suggestions: &[ActionSuggestion],
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        for suggestion in suggestions {
            let event = RawEvent {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                session_id: None,
                kind: EventKind::ActionSuggested,
                payload: serde_json::to_value(suggestion)?,
                timestamp: at,
            };
            self.store.append(event).await?;
        }
        Ok(suggestions.len())
    }
}
