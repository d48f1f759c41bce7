//! Streak Engine: loads streak state, applies the calculator, persists the
//! result with its event, evaluates milestones and mirrors everything into
//! the local cache.
//!
//! Every public operation is safe to call while offline. When the remote
//! store cannot be reached the operation is queued in the
//! [`OfflineEventQueue`] and a [`Projection::Pending`] computed from the
//! cached snapshots is returned instead. Operations for the same user are
//! serialised by a per-user lock; different users never wait on each other.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_core::calculator::{self, StreakRules};
use tether_core::collaborators::ConnectivitySignal;
use tether_core::error::StreakError;
use tether_core::levels;
use tether_core::milestone::{MilestoneScope, StreakMilestone};
use tether_core::notification::{
    milestone_key, milestone_plan, plan_notifications, sync_failure_key, sync_failure_plan,
    NotificationHistory, NotificationPreferences,
};
use tether_core::retry::{retry, RetryPolicy};
use tether_core::reward::{StreakRecoveryItem, UserReward};
use tether_core::store::{EventCommit, RemoteStore, StoreError};
use tether_core::streak::{
    validate_frequency, EventKind, RelationshipStreak, StreakEvent, StreakStatus, UserStreak,
};
use tether_core::time::add_days;
use tether_core::types::{new_event_id, DbId, EventId, Timestamp};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};

use crate::bus::{EngineNotice, NoticeBus};
use crate::cache::{
    notification_history_key, read_json, relationship_snapshots_key, sync_failures_key,
    user_snapshot_key, write_json, LocalCache,
};
use crate::config::EngineConfig;
use crate::ledger::{RewardLedger, CONFLICT_ATTEMPTS};
use crate::milestone::MilestoneEvaluator;
use crate::notifications::{DispatchReport, NotificationDispatcher};
use crate::queue::{OfflineEventQueue, QueuedEvent, QueuedOp};
use crate::remote::RemoteClient;

/// Notification history entries older than this are forgotten.
const HISTORY_RETENTION_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of an engine operation: confirmed by the remote store, or a local
/// projection of a queued operation awaiting sync.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection<T> {
    Confirmed(T),
    Pending(T),
}

impl<T> Projection<T> {
    pub fn value(&self) -> &T {
        match self {
            Projection::Confirmed(v) | Projection::Pending(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Projection::Confirmed(v) | Projection::Pending(v) => v,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Projection::Pending(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOutcome {
    pub event_id: EventId,
    pub user: UserStreak,
    pub points_earned: i64,
    pub milestones: Vec<StreakMilestone>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactOutcome {
    pub event_id: EventId,
    pub user: UserStreak,
    pub relationship: RelationshipStreak,
    pub points_earned: i64,
    pub milestones: Vec<StreakMilestone>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub milestone_id: DbId,
    /// The milestone had been claimed before; nothing was issued.
    pub already_claimed: bool,
    pub reward: Option<UserReward>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub changed: usize,
    pub active: usize,
    pub at_risk: usize,
    pub broken: usize,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub replayed: usize,
    /// One [`StreakError::ReplayExhausted`] per dropped entry.
    pub failures: Vec<StreakError>,
    /// Entries left in the queue (replay stops when connectivity drops).
    pub remaining: usize,
}

/// What the UI renders on the streak screen.
#[derive(Debug, Clone, PartialEq)]
pub struct StreakStats {
    pub user: UserStreak,
    pub active: usize,
    pub at_risk: usize,
    pub broken: usize,
    pub best_relationship_id: Option<DbId>,
    pub best_relationship_streak: i32,
    pub unclaimed_milestones: Vec<StreakMilestone>,
    pub recovery_items: Vec<StreakRecoveryItem>,
}

/// A queued entry that was dropped during replay, kept until the user has
/// been told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub event_id: EventId,
    pub reason: String,
    pub failed_at: Timestamp,
}

fn recovery_items_key(user_id: DbId) -> String {
    format!("snapshot.recovery_items.{user_id}")
}

// ---------------------------------------------------------------------------
// StreakEngine
// ---------------------------------------------------------------------------

pub struct StreakEngine {
    config: EngineConfig,
    remote: Arc<RemoteClient>,
    cache: Arc<dyn LocalCache>,
    queue: OfflineEventQueue,
    evaluator: MilestoneEvaluator,
    ledger: RewardLedger,
    bus: NoticeBus,
    connectivity: Option<Arc<dyn ConnectivitySignal>>,
    notifier: Option<NotificationDispatcher>,
    user_locks: Mutex<HashMap<DbId, Arc<Mutex<()>>>>,
    sync_lock: Mutex<()>,
}

impl StreakEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RemoteStore>,
        cache: Arc<dyn LocalCache>,
    ) -> Self {
        let remote = Arc::new(RemoteClient::new(
            store,
            config.remote_timeout,
            config.remote_retry.clone(),
        ));
        Self {
            queue: OfflineEventQueue::new(cache.clone()),
            evaluator: MilestoneEvaluator::new(remote.clone()),
            ledger: RewardLedger::new(remote.clone()),
            bus: NoticeBus::default(),
            connectivity: None,
            notifier: None,
            user_locks: Mutex::new(HashMap::new()),
            sync_lock: Mutex::new(()),
            config,
            remote,
            cache,
        }
    }

    /// Skip remote calls while the signal reports offline, and stop replay
    /// as soon as it does.
    pub fn with_connectivity(mut self, connectivity: Arc<dyn ConnectivitySignal>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn with_notifications(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.notifier = Some(dispatcher);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.bus.subscribe()
    }

    pub async fn pending_events(&self) -> Result<Vec<QueuedEvent>, StreakError> {
        Ok(self.queue.pending().await?)
    }

    fn is_online(&self) -> bool {
        self.connectivity.as_ref().map_or(true, |c| c.is_online())
    }

    fn rules(&self) -> StreakRules {
        self.config.rules()
    }

    async fn lock_user(&self, user_id: DbId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock().await;
            locks.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Give queued entries a chance to drain before a new operation, so the
    /// new one does not have to queue behind them. Must not be called with
    /// a user lock held.
    async fn drain_if_online(&self) {
        if !self.is_online() {
            return;
        }
        match self.queue.is_empty().await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.replay_queue(&RetryPolicy::no_retry(), true).await {
                    tracing::warn!(error = %e, "Opportunistic replay failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read offline queue"),
        }
    }

    /// Whether a new operation must go behind the queue instead of to the
    /// remote store. Called with the user's lock held.
    async fn must_queue(&self) -> Result<bool, StreakError> {
        Ok(!self.is_online() || !self.queue.is_empty().await?)
    }

    async fn enqueue(&self, event: &QueuedEvent) -> Result<(), StreakError> {
        let queue_len = self.queue.enqueue(event.clone()).await?;
        tracing::info!(
            user_id = event.user_id,
            event_id = %event.event_id,
            queue_len,
            "Event queued for sync",
        );
        self.bus.publish(EngineNotice::EventQueued {
            user_id: event.user_id,
            event_id: event.event_id,
            queue_len,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Record app activity (a daily check-in).
    pub async fn record_user_activity(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<Projection<ActivityOutcome>, StreakError> {
        let event = QueuedEvent {
            event_id: new_event_id(),
            user_id,
            occurred_at: now,
            op: QueuedOp::UserActivity,
        };

        self.drain_if_online().await;
        let _guard = self.lock_user(user_id).await;

        if !self.must_queue().await? {
            match self.apply_activity(event.event_id, user_id, now).await {
                Ok(outcome) => return Ok(Projection::Confirmed(outcome)),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(user_id, error = %e, "Remote store unreachable, queuing activity");
                }
                Err(e) => return Err(e),
            }
        }

        self.enqueue(&event).await?;
        let user = self.cached_user(user_id).await;
        let activity = calculator::apply_user_activity(&user, now);
        let points = calculator::check_in_points(&activity);
        let user = with_points(activity.streak, points);
        self.mirror_user(&user).await;

        Ok(Projection::Pending(ActivityOutcome {
            event_id: event.event_id,
            user,
            points_earned: points,
            milestones: Vec::new(),
        }))
    }

    /// Record contact with a relationship. Also counts as app activity.
    pub async fn record_contact_event(
        &self,
        user_id: DbId,
        relationship_id: DbId,
        kind: EventKind,
        now: Timestamp,
    ) -> Result<Projection<ContactOutcome>, StreakError> {
        if !kind.is_contact() {
            return Err(StreakError::InvalidState(format!(
                "{} is not a contact event",
                kind.as_str()
            )));
        }
        let event = QueuedEvent {
            event_id: new_event_id(),
            user_id,
            occurred_at: now,
            op: QueuedOp::Contact {
                relationship_id,
                kind,
            },
        };

        self.drain_if_online().await;
        let _guard = self.lock_user(user_id).await;

        if !self.must_queue().await? {
            match self
                .apply_contact(event.event_id, user_id, relationship_id, kind, now)
                .await
            {
                Ok(outcome) => return Ok(Projection::Confirmed(outcome)),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(
                        user_id,
                        relationship_id,
                        error = %e,
                        "Remote store unreachable, queuing contact",
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.enqueue(&event).await?;
        let user = self.cached_user(user_id).await;
        let relationship = match self.cached_relationship(user_id, relationship_id).await {
            Some(rel) => rel,
            None => RelationshipStreak::new(
                user_id,
                relationship_id,
                self.config.default_frequency_days,
            )?,
        };
        let relationship = calculator::apply_contact(&relationship, now, &self.rules());
        let activity = calculator::apply_user_activity(&user, now);
        let points = calculator::contact_points(kind, relationship.current_streak);
        let user = with_points(activity.streak, points);
        self.mirror_user(&user).await;
        self.mirror_relationship(&relationship).await;

        Ok(Projection::Pending(ContactOutcome {
            event_id: event.event_id,
            user,
            relationship,
            points_earned: points,
            milestones: Vec::new(),
        }))
    }

    /// Set the contact cadence of a relationship, creating its streak if it
    /// has none yet.
    pub async fn configure_relationship(
        &self,
        user_id: DbId,
        relationship_id: DbId,
        contact_frequency_days: i32,
        now: Timestamp,
    ) -> Result<Projection<RelationshipStreak>, StreakError> {
        validate_frequency(contact_frequency_days)?;
        let event = QueuedEvent {
            event_id: new_event_id(),
            user_id,
            occurred_at: now,
            op: QueuedOp::ConfigureRelationship {
                relationship_id,
                contact_frequency_days,
            },
        };

        self.drain_if_online().await;
        let _guard = self.lock_user(user_id).await;

        if !self.must_queue().await? {
            match self
                .apply_configure(user_id, relationship_id, contact_frequency_days)
                .await
            {
                Ok(streak) => return Ok(Projection::Confirmed(streak)),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(user_id, relationship_id, error = %e, "Remote store unreachable, queuing cadence change");
                }
                Err(e) => return Err(e),
            }
        }

        self.enqueue(&event).await?;
        let projected = match self.cached_relationship(user_id, relationship_id).await {
            Some(rel) => calculator::apply_frequency(&rel, contact_frequency_days, &self.rules()),
            None => RelationshipStreak::new(user_id, relationship_id, contact_frequency_days)?,
        };
        self.mirror_relationship(&projected).await;
        Ok(Projection::Pending(projected))
    }

    /// Daily sweep of every relationship streak of a user.
    ///
    /// While the user has queued events the sweep runs on the cached
    /// snapshots only, so it cannot break a streak that a queued contact
    /// would have kept alive.
    pub async fn run_daily_sweep(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<Projection<SweepReport>, StreakError> {
        let _guard = self.lock_user(user_id).await;

        let user_queued = self
            .queue
            .pending()
            .await?
            .iter()
            .any(|e| e.user_id == user_id);

        if self.is_online() && !user_queued {
            match self.sweep_remote(user_id, now).await {
                Ok((report, streaks)) => {
                    self.mirror_relationships(user_id, &streaks).await;
                    tracing::info!(
                        user_id,
                        checked = report.checked,
                        changed = report.changed,
                        at_risk = report.at_risk,
                        broken = report.broken,
                        "Daily sweep complete",
                    );
                    return Ok(Projection::Confirmed(report));
                }
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(user_id, error = %e, "Remote store unreachable, sweeping cached streaks");
                }
                Err(e) => return Err(e),
            }
        }

        let mut report = SweepReport::default();
        let swept: Vec<RelationshipStreak> = self
            .cached_relationships(user_id)
            .await
            .iter()
            .map(|streak| {
                let next = calculator::apply_sweep(streak, now);
                if next != *streak {
                    report.changed += 1;
                }
                next
            })
            .collect();
        tally(&mut report, &swept);
        self.mirror_relationships(user_id, &swept).await;
        Ok(Projection::Pending(report))
    }

    /// Claim a milestone's reward. Claiming twice is a successful no-op.
    pub async fn claim_milestone(
        &self,
        user_id: DbId,
        milestone_id: DbId,
        now: Timestamp,
    ) -> Result<Projection<ClaimOutcome>, StreakError> {
        let event = QueuedEvent {
            event_id: new_event_id(),
            user_id,
            occurred_at: now,
            op: QueuedOp::ClaimMilestone { milestone_id },
        };

        self.drain_if_online().await;
        let _guard = self.lock_user(user_id).await;

        if !self.must_queue().await? {
            match self
                .apply_claim(event.event_id, user_id, milestone_id, now)
                .await
            {
                Ok(outcome) => return Ok(Projection::Confirmed(outcome)),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(user_id, milestone_id, error = %e, "Remote store unreachable, queuing claim");
                }
                Err(e) => return Err(e),
            }
        }

        self.enqueue(&event).await?;
        Ok(Projection::Pending(ClaimOutcome {
            milestone_id,
            already_claimed: false,
            reward: None,
        }))
    }

    /// Spend a recovery item to extend a relationship's grace period.
    pub async fn use_recovery_item(
        &self,
        user_id: DbId,
        item_id: DbId,
        relationship_id: DbId,
        now: Timestamp,
    ) -> Result<Projection<RelationshipStreak>, StreakError> {
        let event = QueuedEvent {
            event_id: new_event_id(),
            user_id,
            occurred_at: now,
            op: QueuedOp::UseRecoveryItem {
                item_id,
                relationship_id,
            },
        };

        self.drain_if_online().await;
        let _guard = self.lock_user(user_id).await;

        if !self.must_queue().await? {
            match self
                .apply_recovery(event.event_id, user_id, item_id, relationship_id, now)
                .await
            {
                Ok(relationship) => return Ok(Projection::Confirmed(relationship)),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(user_id, item_id, error = %e, "Remote store unreachable, queuing recovery item");
                }
                Err(e) => return Err(e),
            }
        }

        let relationship = self
            .cached_relationship(user_id, relationship_id)
            .await
            .ok_or(StreakError::NotFound {
                entity: "relationship_streak",
                id: relationship_id,
            })?;
        if relationship.status == StreakStatus::Broken || relationship.grace_period_ends.is_none()
        {
            return Err(StreakError::InvalidState(format!(
                "relationship {relationship_id} streak cannot be extended"
            )));
        }
        let days = self
            .cached_recovery_item(user_id, item_id)
            .await
            .map_or(0, |item| self.config.extension_days(item.kind));

        self.enqueue(&event).await?;
        let projected = calculator::extend_grace(&relationship, days);
        self.mirror_relationship(&projected).await;
        Ok(Projection::Pending(projected))
    }

    /// Mark a reward redeemed. Returns `false` if it already was.
    pub async fn redeem_reward(
        &self,
        user_id: DbId,
        reward_id: DbId,
        now: Timestamp,
    ) -> Result<Projection<bool>, StreakError> {
        let event = QueuedEvent {
            event_id: new_event_id(),
            user_id,
            occurred_at: now,
            op: QueuedOp::RedeemReward { reward_id },
        };

        self.drain_if_online().await;
        let _guard = self.lock_user(user_id).await;

        if !self.must_queue().await? {
            match self.ledger.redeem_reward(user_id, reward_id, now).await {
                Ok(redeemed) => return Ok(Projection::Confirmed(redeemed)),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(user_id, reward_id, error = %e, "Remote store unreachable, queuing redemption");
                }
                Err(e) => return Err(e),
            }
        }

        self.enqueue(&event).await?;
        Ok(Projection::Pending(true))
    }

    /// Streak statistics for the UI, from the remote store when reachable.
    pub async fn streak_stats(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<Projection<StreakStats>, StreakError> {
        if self.is_online() {
            match self.load_stats(user_id, now).await {
                Ok(stats) => return Ok(Projection::Confirmed(stats)),
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(user_id, error = %e, "Remote store unreachable, using cached stats");
                }
                Err(e) => return Err(e),
            }
        }

        let user = self.cached_user(user_id).await;
        let relationships = self.cached_relationships(user_id).await;
        let recovery_items: Vec<StreakRecoveryItem> =
            read_json(self.cache.as_ref(), &recovery_items_key(user_id))
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
        Ok(Projection::Pending(build_stats(
            user,
            &relationships,
            Vec::new(),
            recovery_items,
            now,
        )))
    }

    /// Users the daily sweep should visit.
    pub async fn sweep_targets(&self) -> Result<Vec<DbId>, StreakError> {
        let store = self.remote.store();
        Ok(self
            .remote
            .run(|| store.list_users_with_relationships())
            .await?)
    }

    // -----------------------------------------------------------------------
    // Online paths (shared by live calls and replay)
    // -----------------------------------------------------------------------

    async fn apply_activity(
        &self,
        event_id: EventId,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<ActivityOutcome, StreakError> {
        let store = self.remote.store();
        let mut attempt = 0;
        let (committed, points) = loop {
            attempt += 1;
            let user = self
                .remote
                .run(|| store.load_user_streak(user_id))
                .await?
                .unwrap_or_else(|| UserStreak::new(user_id));
            let activity = calculator::apply_user_activity(&user, now);
            let points = calculator::check_in_points(&activity);
            let commit = EventCommit {
                event: StreakEvent {
                    event_id,
                    user_id,
                    relationship_id: None,
                    kind: EventKind::CheckIn,
                    occurred_at: now,
                    points_earned: points,
                },
                user: activity.streak,
                relationship: None,
            };
            match self.remote.run(|| store.commit_event(&commit)).await {
                Ok(committed) => break (committed, points),
                Err(StoreError::Conflict) if attempt < CONFLICT_ATTEMPTS => continue,
                Err(StoreError::Duplicate) => {
                    tracing::debug!(user_id, %event_id, "Activity already applied");
                    return self.already_applied_activity(event_id, user_id, now).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let milestones = self
            .evaluate_or_defer(
                user_id,
                MilestoneScope::User,
                committed.user.current_streak_days,
                now,
            )
            .await
            .into_iter()
            .collect();
        self.mirror_user(&committed.user).await;

        Ok(ActivityOutcome {
            event_id,
            user: committed.user,
            points_earned: points,
            milestones,
        })
    }

    /// The outcome of an activity whose commit already landed, e.g. on an
    /// earlier attempt whose response was lost. Milestones are evaluated
    /// again from the stored streak; recording them is idempotent.
    async fn already_applied_activity(
        &self,
        event_id: EventId,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<ActivityOutcome, StreakError> {
        let store = self.remote.store();
        let user = self
            .remote
            .run(|| store.load_user_streak(user_id))
            .await?
            .unwrap_or_else(|| UserStreak::new(user_id));
        let points_earned = self.committed_points(user_id, None, event_id).await?;
        let milestones = self
            .evaluate_or_defer(user_id, MilestoneScope::User, user.current_streak_days, now)
            .await
            .into_iter()
            .collect();
        self.mirror_user(&user).await;
        Ok(ActivityOutcome {
            event_id,
            user,
            points_earned,
            milestones,
        })
    }

    async fn apply_contact(
        &self,
        event_id: EventId,
        user_id: DbId,
        relationship_id: DbId,
        kind: EventKind,
        now: Timestamp,
    ) -> Result<ContactOutcome, StreakError> {
        let store = self.remote.store();
        let rules = self.rules();
        let mut attempt = 0;
        let (committed, points) = loop {
            attempt += 1;
            let user = self
                .remote
                .run(|| store.load_user_streak(user_id))
                .await?
                .unwrap_or_else(|| UserStreak::new(user_id));
            let relationship = match self
                .remote
                .run(|| store.load_relationship_streak(user_id, relationship_id))
                .await?
            {
                Some(rel) => rel,
                None => RelationshipStreak::new(
                    user_id,
                    relationship_id,
                    self.config.default_frequency_days,
                )?,
            };

            let relationship = calculator::apply_contact(&relationship, now, &rules);
            let activity = calculator::apply_user_activity(&user, now);
            let points = calculator::contact_points(kind, relationship.current_streak);
            let commit = EventCommit {
                event: StreakEvent {
                    event_id,
                    user_id,
                    relationship_id: Some(relationship_id),
                    kind,
                    occurred_at: now,
                    points_earned: points,
                },
                user: activity.streak,
                relationship: Some(relationship),
            };
            match self.remote.run(|| store.commit_event(&commit)).await {
                Ok(committed) => break (committed, points),
                Err(StoreError::Conflict) if attempt < CONFLICT_ATTEMPTS => continue,
                Err(StoreError::Duplicate) => {
                    tracing::debug!(user_id, relationship_id, %event_id, "Contact already applied");
                    return self
                        .already_applied_contact(event_id, user_id, relationship_id, now)
                        .await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let Some(relationship) = committed.relationship else {
            return Err(StreakError::Store(StoreError::Rejected(
                "commit returned no relationship streak".into(),
            )));
        };

        let milestones = self
            .contact_milestones(user_id, &committed.user, &relationship, now)
            .await;

        self.mirror_user(&committed.user).await;
        self.mirror_relationship(&relationship).await;

        Ok(ContactOutcome {
            event_id,
            user: committed.user,
            relationship,
            points_earned: points,
            milestones,
        })
    }

    /// The outcome of a contact whose commit already landed. See
    /// [`StreakEngine::already_applied_activity`].
    async fn already_applied_contact(
        &self,
        event_id: EventId,
        user_id: DbId,
        relationship_id: DbId,
        now: Timestamp,
    ) -> Result<ContactOutcome, StreakError> {
        let store = self.remote.store();
        let user = self
            .remote
            .run(|| store.load_user_streak(user_id))
            .await?
            .unwrap_or_else(|| UserStreak::new(user_id));
        let relationship = self
            .remote
            .run(|| store.load_relationship_streak(user_id, relationship_id))
            .await?
            .ok_or(StreakError::NotFound {
                entity: "relationship_streak",
                id: relationship_id,
            })?;
        let points_earned = self
            .committed_points(user_id, Some(relationship_id), event_id)
            .await?;
        let milestones = self
            .contact_milestones(user_id, &user, &relationship, now)
            .await;
        self.mirror_user(&user).await;
        self.mirror_relationship(&relationship).await;
        Ok(ContactOutcome {
            event_id,
            user,
            relationship,
            points_earned,
            milestones,
        })
    }

    async fn contact_milestones(
        &self,
        user_id: DbId,
        user: &UserStreak,
        relationship: &RelationshipStreak,
        now: Timestamp,
    ) -> Vec<StreakMilestone> {
        let mut milestones = Vec::new();
        milestones.extend(
            self.evaluate_or_defer(
                user_id,
                MilestoneScope::Relationship(relationship.relationship_id),
                relationship.current_streak,
                now,
            )
            .await,
        );
        milestones.extend(
            self.evaluate_or_defer(user_id, MilestoneScope::User, user.current_streak_days, now)
                .await,
        );
        milestones
    }

    /// Points stored with an already-committed event.
    async fn committed_points(
        &self,
        user_id: DbId,
        relationship_id: Option<DbId>,
        event_id: EventId,
    ) -> Result<i64, StreakError> {
        let store = self.remote.store();
        let events = self
            .remote
            .run(|| store.list_events(user_id, relationship_id))
            .await?;
        Ok(events
            .iter()
            .find(|e| e.event_id == event_id)
            .map_or(0, |e| e.points_earned))
    }

    async fn apply_configure(
        &self,
        user_id: DbId,
        relationship_id: DbId,
        contact_frequency_days: i32,
    ) -> Result<RelationshipStreak, StreakError> {
        let store = self.remote.store();
        let rules = self.rules();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let next = match self
                .remote
                .run(|| store.load_relationship_streak(user_id, relationship_id))
                .await?
            {
                Some(rel) => calculator::apply_frequency(&rel, contact_frequency_days, &rules),
                None => RelationshipStreak::new(user_id, relationship_id, contact_frequency_days)?,
            };
            match self
                .remote
                .run(|| store.save_relationship_streak(&next))
                .await
            {
                Ok(saved) => {
                    self.mirror_relationship(&saved).await;
                    return Ok(saved);
                }
                Err(StoreError::Conflict) if attempt < CONFLICT_ATTEMPTS => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `event_id` keys the claim: replaying it after a lost response returns
    /// the original payout instead of reporting the milestone claimed.
    async fn apply_claim(
        &self,
        event_id: EventId,
        user_id: DbId,
        milestone_id: DbId,
        now: Timestamp,
    ) -> Result<ClaimOutcome, StreakError> {
        match self
            .ledger
            .claim_milestone(user_id, milestone_id, event_id, now)
            .await
        {
            Ok(claim) => Ok(ClaimOutcome {
                milestone_id,
                already_claimed: false,
                reward: Some(claim.reward),
            }),
            Err(StreakError::AlreadyClaimed(_)) => {
                tracing::debug!(user_id, milestone_id, "Milestone already claimed");
                Ok(ClaimOutcome {
                    milestone_id,
                    already_claimed: true,
                    reward: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_recovery(
        &self,
        event_id: EventId,
        user_id: DbId,
        item_id: DbId,
        relationship_id: DbId,
        now: Timestamp,
    ) -> Result<RelationshipStreak, StreakError> {
        let used = self
            .ledger
            .use_recovery_item(
                user_id,
                item_id,
                relationship_id,
                event_id,
                |kind| self.config.extension_days(kind),
                now,
            )
            .await?;
        self.mirror_relationship(&used.relationship).await;
        Ok(used.relationship)
    }

    async fn sweep_remote(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<(SweepReport, Vec<RelationshipStreak>), StreakError> {
        let store = self.remote.store();
        let streaks = self
            .remote
            .run(|| store.list_relationship_streaks(user_id))
            .await?;

        let mut report = SweepReport::default();
        let mut swept = Vec::with_capacity(streaks.len());
        for streak in streaks {
            let (saved, changed) = self.sweep_one(streak, now).await?;
            if changed {
                report.changed += 1;
            }
            swept.push(saved);
        }
        tally(&mut report, &swept);
        Ok((report, swept))
    }

    async fn sweep_one(
        &self,
        loaded: RelationshipStreak,
        now: Timestamp,
    ) -> Result<(RelationshipStreak, bool), StreakError> {
        let store = self.remote.store();
        let (user_id, relationship_id) = (loaded.user_id, loaded.relationship_id);
        let mut current = loaded;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let next = calculator::apply_sweep(&current, now);
            if next == current {
                return Ok((current, false));
            }
            match self
                .remote
                .run(|| store.save_relationship_streak(&next))
                .await
            {
                Ok(saved) => return Ok((saved, true)),
                Err(StoreError::Conflict) if attempt < CONFLICT_ATTEMPTS => {
                    current = self
                        .remote
                        .run(|| store.load_relationship_streak(user_id, relationship_id))
                        .await?
                        .ok_or(StreakError::NotFound {
                            entity: "relationship_streak",
                            id: relationship_id,
                        })?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn load_stats(&self, user_id: DbId, now: Timestamp) -> Result<StreakStats, StreakError> {
        let store = self.remote.store();
        let user = self
            .remote
            .run(|| store.load_user_streak(user_id))
            .await?
            .unwrap_or_else(|| UserStreak::new(user_id));
        let relationships = self
            .remote
            .run(|| store.list_relationship_streaks(user_id))
            .await?;
        let unclaimed = self
            .remote
            .run(|| store.list_unclaimed_milestones(user_id))
            .await?;
        let items = self
            .remote
            .run(|| store.list_recovery_items(user_id))
            .await?;

        self.mirror_user(&user).await;
        self.mirror_relationships(user_id, &relationships).await;
        if let Err(e) = write_json(self.cache.as_ref(), &recovery_items_key(user_id), &items).await
        {
            tracing::warn!(user_id, error = %e, "Failed to cache recovery items");
        }

        Ok(build_stats(user, &relationships, unclaimed, items, now))
    }

    async fn evaluate_milestone(
        &self,
        user_id: DbId,
        scope: MilestoneScope,
        streak_length: i32,
        now: Timestamp,
    ) -> Result<Option<StreakMilestone>, StreakError> {
        let milestone = self
            .evaluator
            .evaluate(user_id, scope, streak_length, now)
            .await?;
        if let Some(milestone) = &milestone {
            self.bus.publish(EngineNotice::MilestoneAchieved {
                user_id,
                milestone: milestone.clone(),
            });
        }
        Ok(milestone)
    }

    /// Evaluate after a committed event. A failed evaluation is queued and
    /// replayed with the rest of the offline queue, so a milestone earned by
    /// the event is recorded even if no later event reaches the same length.
    async fn evaluate_or_defer(
        &self,
        user_id: DbId,
        scope: MilestoneScope,
        streak_length: i32,
        now: Timestamp,
    ) -> Option<StreakMilestone> {
        match self
            .evaluate_milestone(user_id, scope, streak_length, now)
            .await
        {
            Ok(milestone) => milestone,
            Err(e) => {
                tracing::warn!(
                    user_id,
                    relationship_id = scope.relationship_id(),
                    streak_length,
                    error = %e,
                    "Milestone evaluation failed, queuing retry",
                );
                let deferred = QueuedEvent {
                    event_id: new_event_id(),
                    user_id,
                    occurred_at: now,
                    op: QueuedOp::EvaluateMilestone {
                        relationship_id: scope.relationship_id(),
                        streak_length,
                    },
                };
                if let Err(e) = self.enqueue(&deferred).await {
                    tracing::error!(user_id, error = %e, "Failed to queue milestone evaluation");
                }
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Offline replay
    // -----------------------------------------------------------------------

    /// Replay the offline queue in recorded order through the normal online
    /// paths.
    ///
    /// Each entry is retried under the replay policy. An entry that still
    /// fails is dropped, reported as [`StreakError::ReplayExhausted`] in the
    /// returned report, published as [`EngineNotice::SyncFailed`] and kept as
    /// a [`SyncFailure`] until the user is notified. Replay stops early,
    /// leaving the rest queued, when the connectivity signal goes offline.
    /// Afterwards the cached snapshots of every affected user are replaced
    /// with the remote state.
    pub async fn sync_pending(&self) -> Result<SyncReport, StreakError> {
        self.replay_queue(&self.config.replay_retry, false).await
    }

    /// With `keep_unreachable`, an entry that cannot reach the store stays
    /// queued and replay stops instead of dropping it.
    async fn replay_queue(
        &self,
        policy: &RetryPolicy,
        keep_unreachable: bool,
    ) -> Result<SyncReport, StreakError> {
        let _sync = self.sync_lock.lock().await;
        let mut report = SyncReport::default();
        let mut touched = BTreeSet::new();

        while self.is_online() {
            let Some(event) = self.queue.peek().await? else {
                break;
            };

            let result = retry(policy, StreakError::is_unreachable, || {
                self.replay_one(&event)
            })
            .await;

            match result {
                Ok(()) => {
                    self.queue.remove_front(event.event_id).await?;
                    report.replayed += 1;
                    tracing::debug!(event_id = %event.event_id, "Replayed queued event");
                }
                Err(failure)
                    if failure.error.is_unreachable()
                        && (keep_unreachable || !self.is_online()) =>
                {
                    tracing::info!(
                        event_id = %event.event_id,
                        "Remote store unreachable during replay, keeping event queued",
                    );
                    break;
                }
                Err(failure) => {
                    self.queue.remove_front(event.event_id).await?;
                    let reason = failure.error.to_string();
                    tracing::error!(
                        user_id = event.user_id,
                        event_id = %event.event_id,
                        attempts = failure.attempts,
                        error = %reason,
                        "Dropping queued event after failed replay",
                    );
                    self.record_sync_failure(&event, &reason).await;
                    self.bus.publish(EngineNotice::SyncFailed {
                        user_id: event.user_id,
                        event_id: event.event_id,
                        reason: reason.clone(),
                    });
                    report.failures.push(StreakError::ReplayExhausted {
                        event_id: event.event_id,
                        attempts: failure.attempts,
                        reason,
                    });
                }
            }
            touched.insert(event.user_id);
        }

        for user_id in touched {
            self.refresh_snapshots(user_id).await;
        }

        report.remaining = self.queue.len().await?;
        if report.replayed > 0 || !report.failures.is_empty() {
            tracing::info!(
                replayed = report.replayed,
                failed = report.failures.len(),
                remaining = report.remaining,
                "Offline queue sync finished",
            );
            self.bus.publish(EngineNotice::SyncCompleted {
                replayed: report.replayed,
                failed: report.failures.len(),
            });
        }
        Ok(report)
    }

    async fn replay_one(&self, event: &QueuedEvent) -> Result<(), StreakError> {
        let _guard = self.lock_user(event.user_id).await;
        let (user_id, at) = (event.user_id, event.occurred_at);
        match &event.op {
            QueuedOp::UserActivity => {
                self.apply_activity(event.event_id, user_id, at).await?;
            }
            QueuedOp::Contact {
                relationship_id,
                kind,
            } => {
                self.apply_contact(event.event_id, user_id, *relationship_id, *kind, at)
                    .await?;
            }
            QueuedOp::ConfigureRelationship {
                relationship_id,
                contact_frequency_days,
            } => {
                self.apply_configure(user_id, *relationship_id, *contact_frequency_days)
                    .await?;
            }
            QueuedOp::ClaimMilestone { milestone_id } => {
                self.apply_claim(event.event_id, user_id, *milestone_id, at)
                    .await?;
            }
            QueuedOp::UseRecoveryItem {
                item_id,
                relationship_id,
            } => {
                self.apply_recovery(event.event_id, user_id, *item_id, *relationship_id, at)
                    .await?;
            }
            QueuedOp::EvaluateMilestone {
                relationship_id,
                streak_length,
            } => {
                let scope = MilestoneScope::from_relationship(*relationship_id);
                self.evaluate_milestone(user_id, scope, *streak_length, at)
                    .await?;
            }
            QueuedOp::RedeemReward { reward_id } => {
                self.ledger.redeem_reward(user_id, *reward_id, at).await?;
            }
        }
        Ok(())
    }

    /// Queued entries dropped during replay that the user has not been told
    /// about yet.
    pub async fn sync_failures(&self, user_id: DbId) -> Result<Vec<SyncFailure>, StreakError> {
        Ok(read_json(self.cache.as_ref(), &sync_failures_key(user_id))
            .await?
            .unwrap_or_default())
    }

    async fn record_sync_failure(&self, event: &QueuedEvent, reason: &str) {
        let key = sync_failures_key(event.user_id);
        let mut failures = self.sync_failures(event.user_id).await.unwrap_or_default();
        failures.push(SyncFailure {
            event_id: event.event_id,
            reason: reason.to_string(),
            failed_at: chrono::Utc::now(),
        });
        if let Err(e) = write_json(self.cache.as_ref(), &key, &failures).await {
            tracing::warn!(user_id = event.user_id, error = %e, "Failed to record sync failure");
        }
    }

    /// Replace cached snapshots with the authoritative remote state.
    async fn refresh_snapshots(&self, user_id: DbId) {
        let store = self.remote.store();
        match self.remote.run(|| store.load_user_streak(user_id)).await {
            Ok(Some(user)) => self.mirror_user(&user).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(user_id, error = %e, "Failed to refresh user snapshot"),
        }
        match self
            .remote
            .run(|| store.list_relationship_streaks(user_id))
            .await
        {
            Ok(streaks) => self.mirror_relationships(user_id, &streaks).await,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to refresh relationship snapshots")
            }
        }
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Decide, render and hand over every notification due for a user:
    /// at-risk warnings, reminders, unannounced milestones and sync
    /// failures. Sent dedupe keys are recorded in the local history.
    pub async fn dispatch_notifications(
        &self,
        user_id: DbId,
        prefs: &NotificationPreferences,
        now: Timestamp,
    ) -> Result<DispatchReport, StreakError> {
        let Some(notifier) = &self.notifier else {
            tracing::debug!(user_id, "No notification dispatcher configured");
            return Ok(DispatchReport::default());
        };

        let history_key = notification_history_key(user_id);
        let mut history: NotificationHistory = read_json(self.cache.as_ref(), &history_key)
            .await?
            .unwrap_or_default();

        let streaks = match self.remote_relationships(user_id).await {
            Some(streaks) => streaks,
            None => self.cached_relationships(user_id).await,
        };
        let mut plans = plan_notifications(&streaks, prefs, &history, now);

        if prefs.enabled && self.is_online() {
            let store = self.remote.store();
            match self
                .remote
                .run(|| store.list_unclaimed_milestones(user_id))
                .await
            {
                Ok(milestones) => plans.extend(
                    milestones
                        .iter()
                        .filter(|m| !history.contains_key(&milestone_key(m.id)))
                        .map(|m| milestone_plan(m, prefs, now)),
                ),
                Err(e) => tracing::debug!(user_id, error = %e, "Skipping milestone notifications"),
            }
        }

        let failures = self.sync_failures(user_id).await?;
        plans.extend(
            failures
                .iter()
                .filter(|f| !history.contains_key(&sync_failure_key(f.event_id)))
                .map(|f| sync_failure_plan(f.event_id, prefs, now)),
        );

        let report = notifier.dispatch(&plans).await;

        for (key, _) in &report.scheduled {
            history.insert(key.clone(), now);
        }
        let cutoff = add_days(now, -HISTORY_RETENTION_DAYS);
        history.retain(|_, sent_at| *sent_at >= cutoff);
        write_json(self.cache.as_ref(), &history_key, &history).await?;

        let remaining: Vec<SyncFailure> = failures
            .into_iter()
            .filter(|f| !history.contains_key(&sync_failure_key(f.event_id)))
            .collect();
        write_json(self.cache.as_ref(), &sync_failures_key(user_id), &remaining).await?;

        tracing::info!(
            user_id,
            scheduled = report.scheduled.len(),
            failed = report.failed,
            "Notifications dispatched",
        );
        Ok(report)
    }

    async fn remote_relationships(&self, user_id: DbId) -> Option<Vec<RelationshipStreak>> {
        if !self.is_online() {
            return None;
        }
        let store = self.remote.store();
        match self
            .remote
            .run(|| store.list_relationship_streaks(user_id))
            .await
        {
            Ok(streaks) => {
                self.mirror_relationships(user_id, &streaks).await;
                Some(streaks)
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Using cached streaks for notifications");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Local cache mirror
    // -----------------------------------------------------------------------

    async fn cached_user(&self, user_id: DbId) -> UserStreak {
        match read_json(self.cache.as_ref(), &user_snapshot_key(user_id)).await {
            Ok(Some(user)) => user,
            Ok(None) => UserStreak::new(user_id),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Discarding unreadable user snapshot");
                UserStreak::new(user_id)
            }
        }
    }

    async fn cached_relationships(&self, user_id: DbId) -> Vec<RelationshipStreak> {
        match read_json(self.cache.as_ref(), &relationship_snapshots_key(user_id)).await {
            Ok(streaks) => streaks.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Discarding unreadable relationship snapshots");
                Vec::new()
            }
        }
    }

    async fn cached_relationship(
        &self,
        user_id: DbId,
        relationship_id: DbId,
    ) -> Option<RelationshipStreak> {
        self.cached_relationships(user_id)
            .await
            .into_iter()
            .find(|s| s.relationship_id == relationship_id)
    }

    async fn cached_recovery_item(&self, user_id: DbId, item_id: DbId) -> Option<StreakRecoveryItem> {
        let items: Vec<StreakRecoveryItem> =
            read_json(self.cache.as_ref(), &recovery_items_key(user_id))
                .await
                .ok()
                .flatten()?;
        items.into_iter().find(|i| i.id == item_id)
    }

    async fn mirror_user(&self, user: &UserStreak) {
        if let Err(e) = write_json(self.cache.as_ref(), &user_snapshot_key(user.user_id), user).await
        {
            tracing::warn!(user_id = user.user_id, error = %e, "Failed to mirror user streak");
        }
    }

    async fn mirror_relationship(&self, streak: &RelationshipStreak) {
        let mut streaks = self.cached_relationships(streak.user_id).await;
        match streaks
            .iter_mut()
            .find(|s| s.relationship_id == streak.relationship_id)
        {
            Some(existing) => *existing = streak.clone(),
            None => streaks.push(streak.clone()),
        }
        self.mirror_relationships(streak.user_id, &streaks).await;
    }

    async fn mirror_relationships(&self, user_id: DbId, streaks: &[RelationshipStreak]) {
        let key = relationship_snapshots_key(user_id);
        if let Err(e) = write_json(self.cache.as_ref(), &key, &streaks).await {
            tracing::warn!(user_id, error = %e, "Failed to mirror relationship streaks");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Locally credit points to a projected user streak.
fn with_points(mut user: UserStreak, points: i64) -> UserStreak {
    user.total_points += points;
    let progress = levels::level_for_points(user.total_points);
    user.level = progress.level;
    user.points_to_next_level = progress.points_to_next_level;
    user
}

fn tally(report: &mut SweepReport, streaks: &[RelationshipStreak]) {
    report.checked = streaks.len();
    for streak in streaks {
        match streak.status {
            StreakStatus::Active => report.active += 1,
            StreakStatus::AtRisk => report.at_risk += 1,
            StreakStatus::Broken => report.broken += 1,
        }
    }
}

fn build_stats(
    user: UserStreak,
    relationships: &[RelationshipStreak],
    unclaimed_milestones: Vec<StreakMilestone>,
    recovery_items: Vec<StreakRecoveryItem>,
    now: Timestamp,
) -> StreakStats {
    let mut counts = SweepReport::default();
    tally(&mut counts, relationships);
    let best = relationships
        .iter()
        .filter(|s| s.current_streak > 0)
        .max_by_key(|s| (s.current_streak, -s.relationship_id));

    StreakStats {
        user,
        active: counts.active,
        at_risk: counts.at_risk,
        broken: counts.broken,
        best_relationship_id: best.map(|s| s.relationship_id),
        best_relationship_streak: best.map_or(0, |s| s.current_streak),
        unclaimed_milestones,
        recovery_items: recovery_items
            .into_iter()
            .filter(|item| item.is_available(now))
            .collect(),
    }
}
