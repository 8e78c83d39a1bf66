//! Live session registry.
//!
//! Maps a user id to the broadcast channel feeding that user's connected
//! sessions. Owned by the delivery side and passed by handle; nothing else
//! in the crate touches it. Lifecycle is explicit: register on connect,
//! unregister on disconnect (or lazily when publish finds no receivers).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::event::ActionSuggestion;

/// Per-user buffered suggestions before a slow session starts lagging.
const CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, broadcast::Sender<ActionSuggestion>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session for a user, creating the channel on first use.
    pub async fn register(&self, user_id: &str) -> broadcast::Receiver<ActionSuggestion> {
        let mut inner = self.inner.write().await;
        inner
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop a user's channel. Outstanding receivers see the stream end.
    pub async fn unregister(&self, user_id: &str) {
        self.inner.write().await.remove(user_id);
    }

    /// Deliver one suggestion to a user's live sessions.
    ///
    /// Returns `true` when at least one session received it. A channel whose
    /// sessions have all disconnected is pruned here.
    pub async fn publish(&self, user_id: &str, suggestion: ActionSuggestion) -> bool {
        let delivered = {
            let inner = self.inner.read().await;
            match inner.get(user_id) {
                Some(sender) => sender.send(suggestion).is_ok(),
                None => return false,
            }
        };
        if !delivered {
            self.inner.write().await.remove(user_id);
        }
        delivered
    }

    /// Users with a registered channel.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.len()
    }
}
