//! Offline Event Queue: a FIFO of streak-affecting operations that could not
//! reach the remote store, persisted in the local cache.
//!
//! The queue only stores and orders entries. Replaying them through the
//! engine's normal code path is [`StreakEngine::sync_pending`]'s job.
//!
//! [`StreakEngine::sync_pending`]: crate::engine::StreakEngine::sync_pending

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_core::streak::EventKind;
use tether_core::types::{DbId, EventId, Timestamp};
use tokio::sync::Mutex;

use crate::cache::{read_json, write_json, CacheError, LocalCache, PENDING_EVENTS_KEY};

/// The operation a queued entry replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueuedOp {
    UserActivity,
    Contact {
        relationship_id: DbId,
        kind: EventKind,
    },
    ConfigureRelationship {
        relationship_id: DbId,
        contact_frequency_days: i32,
    },
    ClaimMilestone {
        milestone_id: DbId,
    },
    UseRecoveryItem {
        item_id: DbId,
        relationship_id: DbId,
    },
    /// Milestone evaluation for a committed event whose evaluation failed.
    /// `relationship_id` is `None` for the user-level streak.
    EvaluateMilestone {
        relationship_id: Option<DbId>,
        streak_length: i32,
    },
    RedeemReward {
        reward_id: DbId,
    },
}

/// One pending operation, in the order it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub event_id: EventId,
    pub user_id: DbId,
    pub occurred_at: Timestamp,
    #[serde(flatten)]
    pub op: QueuedOp,
}

/// FIFO of [`QueuedEvent`]s stored under one cache key.
///
/// Every mutation rewrites the whole list under a lock, so the cached copy
/// is always the authoritative queue and survives restarts.
pub struct OfflineEventQueue {
    cache: Arc<dyn LocalCache>,
    lock: Mutex<()>,
}

impl OfflineEventQueue {
    pub fn new(cache: Arc<dyn LocalCache>) -> Self {
        Self {
            cache,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<VecDeque<QueuedEvent>, CacheError> {
        Ok(read_json(self.cache.as_ref(), PENDING_EVENTS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn store(&self, events: &VecDeque<QueuedEvent>) -> Result<(), CacheError> {
        if events.is_empty() {
            self.cache.remove(PENDING_EVENTS_KEY).await
        } else {
            write_json(self.cache.as_ref(), PENDING_EVENTS_KEY, events).await
        }
    }

    /// Append to the back. Returns the new queue length.
    pub async fn enqueue(&self, event: QueuedEvent) -> Result<usize, CacheError> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        events.push_back(event);
        self.store(&events).await?;
        Ok(events.len())
    }

    pub async fn peek(&self) -> Result<Option<QueuedEvent>, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.pop_front())
    }

    /// Remove the entry with `event_id` if it is at the front.
    ///
    /// Returns `false` when the front entry is a different one, which means
    /// another replay already settled this entry.
    pub async fn remove_front(&self, event_id: EventId) -> Result<bool, CacheError> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        if events.front().map(|e| e.event_id) != Some(event_id) {
            return Ok(false);
        }
        events.pop_front();
        self.store(&events).await?;
        Ok(true)
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len().await? == 0)
    }

    /// Every pending entry, oldest first.
    pub async fn pending(&self) -> Result<Vec<QueuedEvent>, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into())
    }
}
