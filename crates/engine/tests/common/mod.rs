#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tether_core::collaborators::{
    DeliveryError, DeliveryHandle, NotificationDelivery, RelationshipDirectory,
};
use tether_core::notification::NotificationRequest;
use tether_core::retry::RetryPolicy;
use tether_core::streak::{RelationshipStreak, UserStreak};
use tether_core::time::add_days;
use tether_core::types::{DbId, Timestamp};
use tether_engine::{
    ConnectivityState, EngineConfig, InMemoryRemoteStore, MemoryCache, NotificationDispatcher,
    StreakEngine,
};
use tokio::sync::Mutex;

pub const USER: DbId = 1;
pub const FRIEND: DbId = 10;

/// `hour`:00 UTC on the given day of March 2026.
pub fn at(day: u32, hour: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

/// Engine config with no foreground retries and a fast replay policy.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        remote_timeout: Duration::from_secs(1),
        remote_retry: RetryPolicy::no_retry(),
        replay_retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        },
        ..EngineConfig::default()
    }
}

/// [`test_config`] with one foreground retry on transport failures.
pub fn retrying_config() -> EngineConfig {
    EngineConfig {
        remote_retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
            jitter: 0.0,
        },
        ..test_config()
    }
}

/// A relationship streak of `length` whose last contact was at `last`.
pub fn relationship(relationship_id: DbId, length: i32, last: Timestamp) -> RelationshipStreak {
    let mut streak = RelationshipStreak::new(USER, relationship_id, 7).unwrap();
    streak.current_streak = length;
    streak.longest_streak = length;
    streak.last_contact_date = Some(last);
    streak.next_contact_due_date = Some(add_days(last, 7));
    streak.grace_period_ends = Some(add_days(last, 9));
    streak
}

/// A user streak of `days` consecutive days ending at `last`.
pub fn user_streak(days: i32, multiplier: f64, last: Timestamp) -> UserStreak {
    let mut streak = UserStreak::new(USER);
    streak.current_streak_days = days;
    streak.longest_streak_days = days;
    streak.multiplier = multiplier;
    streak.last_activity_date = Some(last);
    streak
}

// ---------------------------------------------------------------------------
// Collaborator fakes
// ---------------------------------------------------------------------------

pub struct FixedDirectory;

#[async_trait]
impl RelationshipDirectory for FixedDirectory {
    async fn display_name(&self, _relationship_id: DbId) -> Option<String> {
        Some("Sam".to_string())
    }
}

/// Records every scheduled request; optionally refuses all of them.
#[derive(Default)]
pub struct RecordingDelivery {
    pub requests: Mutex<Vec<NotificationRequest>>,
    pub refuse: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl NotificationDelivery for RecordingDelivery {
    async fn schedule(
        &self,
        request: &NotificationRequest,
    ) -> Result<DeliveryHandle, DeliveryError> {
        if self.refuse.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DeliveryError::Unavailable("push service down".into()));
        }
        let mut requests = self.requests.lock().await;
        requests.push(request.clone());
        Ok(DeliveryHandle(format!("handle-{}", requests.len())))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Arc<StreakEngine>,
    pub store: Arc<InMemoryRemoteStore>,
    pub cache: Arc<MemoryCache>,
    pub connectivity: Arc<ConnectivityState>,
    pub delivery: Arc<RecordingDelivery>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryRemoteStore::new()))
    }

    /// A second device talking to the same remote store.
    pub fn second_device(&self) -> Self {
        Self::with_store(test_config(), self.store.clone())
    }

    fn with_store(config: EngineConfig, store: Arc<InMemoryRemoteStore>) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let connectivity = Arc::new(ConnectivityState::new(true));
        let delivery = Arc::new(RecordingDelivery::default());
        let engine = StreakEngine::new(config, store.clone(), cache.clone())
            .with_connectivity(connectivity.clone())
            .with_notifications(NotificationDispatcher::new(
                Arc::new(FixedDirectory),
                delivery.clone(),
            ));
        Self {
            engine: Arc::new(engine),
            store,
            cache,
            connectivity,
            delivery,
        }
    }

    /// Device and store both offline.
    pub fn go_offline(&self) {
        self.connectivity.set_online(false);
        self.store.set_online(false);
    }

    pub fn go_online(&self) {
        self.store.set_online(true);
        self.connectivity.set_online(true);
    }
}
