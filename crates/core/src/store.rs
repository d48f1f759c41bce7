//! Remote Store seam.
//!
//! [`RemoteStore`] is the authoritative relational store for every streak
//! entity. Implementations hold no business logic beyond what is needed to
//! make a single call atomic: conditional updates on `version`, uniqueness
//! checks, and reward effects with their level recomputation.
//!
//! Every write is either version-conditional or keyed (event id, grant key,
//! claim id, use id), so a caller may repeat it after a lost response
//! without applying it twice.

use async_trait::async_trait;

use crate::milestone::{NewMilestone, StreakMilestone};
use crate::reward::{RewardGrant, StreakRecoveryItem, UserReward};
use crate::streak::{RelationshipStreak, StreakEvent, UserStreak};
use crate::types::{DbId, EventId, Timestamp};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (network, DNS, pool exhausted, ...).
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within its timeout.
    #[error("Store call timed out")]
    Timeout,

    /// A conditional update lost against a concurrent writer.
    #[error("Concurrent update conflict")]
    Conflict,

    /// A uniqueness constraint rejected the write.
    #[error("Duplicate row")]
    Duplicate,

    #[error("Row not found")]
    NotFound,

    /// The store refused the write for any other reason.
    #[error("Store rejected request: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether trying again later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unreachable(_) | StoreError::Timeout | StoreError::Conflict
        )
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// Everything one streak event changes, written atomically.
///
/// The store must:
/// 1. append `event`, failing with [`StoreError::Duplicate`] if its
///    `event_id` already exists (and writing nothing else);
/// 2. write the streak fields of `user` (insert when `version == 0`,
///    otherwise update only where the stored version matches), failing with
///    [`StoreError::Conflict`] on a mismatch;
/// 3. do the same for `relationship` when present;
/// 4. add `event.points_earned` to the user's point total and recompute the
///    level fields.
///
/// Point totals and level fields on `user` are ignored in favour of the
/// stored values.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCommit {
    pub event: StreakEvent,
    pub user: UserStreak,
    pub relationship: Option<RelationshipStreak>,
}

/// Stored state after a successful [`EventCommit`], with bumped versions.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedEvent {
    pub user: UserStreak,
    pub relationship: Option<RelationshipStreak>,
}

// ---------------------------------------------------------------------------
// Claims and recovery
// ---------------------------------------------------------------------------

/// A claim on a milestone, keyed by `claim_id`.
///
/// The store flips `claimed` and grants `payout` in one transaction.
/// Repeating a claim id that already won returns the original outcome;
/// any other claim id on a claimed milestone gets
/// [`ClaimResult::AlreadyClaimed`] and writes nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct MilestoneClaim {
    pub user_id: DbId,
    pub milestone_id: DbId,
    pub claim_id: EventId,
    pub claimed_at: Timestamp,
    pub payout: RewardGrant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    Claimed {
        milestone: StreakMilestone,
        reward: UserReward,
    },
    AlreadyClaimed,
}

/// One recovery item spent against a relationship, keyed by `use_id`.
///
/// The store records the use, decrements the item only where
/// `quantity > 0`, and conditionally saves `extended` (the relationship with
/// its new grace deadline) in one transaction. Nothing is written when the
/// item is empty or the relationship version moved on. Repeating a use id
/// returns the stored relationship without spending again.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverySpend {
    pub user_id: DbId,
    pub item_id: DbId,
    pub use_id: EventId,
    pub used_at: Timestamp,
    pub extended: RelationshipStreak,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpendResult {
    Spent(RelationshipStreak),
    OutOfStock,
}

// ---------------------------------------------------------------------------
// RemoteStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RemoteStore: Send + Sync {
    // --- streaks ---

    async fn load_user_streak(&self, user_id: DbId) -> Result<Option<UserStreak>, StoreError>;

    async fn load_relationship_streak(
        &self,
        user_id: DbId,
        relationship_id: DbId,
    ) -> Result<Option<RelationshipStreak>, StoreError>;

    async fn list_relationship_streaks(
        &self,
        user_id: DbId,
    ) -> Result<Vec<RelationshipStreak>, StoreError>;

    /// Insert (`version == 0`) or conditionally update a relationship streak
    /// without appending an event.
    async fn save_relationship_streak(
        &self,
        streak: &RelationshipStreak,
    ) -> Result<RelationshipStreak, StoreError>;

    async fn commit_event(&self, commit: &EventCommit) -> Result<CommittedEvent, StoreError>;

    /// Users with at least one relationship streak (daily sweep targets).
    async fn list_users_with_relationships(&self) -> Result<Vec<DbId>, StoreError>;

    async fn list_events(
        &self,
        user_id: DbId,
        relationship_id: Option<DbId>,
    ) -> Result<Vec<StreakEvent>, StoreError>;

    // --- milestones ---

    async fn list_milestones(
        &self,
        user_id: DbId,
        relationship_id: Option<DbId>,
    ) -> Result<Vec<StreakMilestone>, StoreError>;

    async fn list_unclaimed_milestones(
        &self,
        user_id: DbId,
    ) -> Result<Vec<StreakMilestone>, StoreError>;

    async fn get_milestone(
        &self,
        user_id: DbId,
        milestone_id: DbId,
    ) -> Result<Option<StreakMilestone>, StoreError>;

    /// Insert a milestone together with its `badge` grant;
    /// [`StoreError::Duplicate`] (nothing written) if one already exists for
    /// the same `(user_id, relationship_id, milestone_type)`.
    async fn record_milestone(
        &self,
        milestone: &NewMilestone,
        badge: &RewardGrant,
    ) -> Result<StreakMilestone, StoreError>;

    async fn claim_milestone(&self, claim: &MilestoneClaim) -> Result<ClaimResult, StoreError>;

    // --- rewards ---

    /// Record a reward and apply its effect in one transaction, once per
    /// `(user_id, grant_key)`. A repeated key returns the stored reward.
    async fn grant_reward(&self, grant: &RewardGrant) -> Result<UserReward, StoreError>;

    async fn list_rewards(&self, user_id: DbId) -> Result<Vec<UserReward>, StoreError>;

    /// Flip `redeemed` to true. Returns `false` if missing or already redeemed.
    async fn mark_reward_redeemed(
        &self,
        user_id: DbId,
        reward_id: DbId,
        redeemed_at: Timestamp,
    ) -> Result<bool, StoreError>;

    // --- recovery items ---

    async fn list_recovery_items(
        &self,
        user_id: DbId,
    ) -> Result<Vec<StreakRecoveryItem>, StoreError>;

    async fn get_recovery_item(
        &self,
        user_id: DbId,
        item_id: DbId,
    ) -> Result<Option<StreakRecoveryItem>, StoreError>;

    /// Consume one unit of stock and save the extended relationship, once per
    /// `use_id`. A repeated `use_id` returns the relationship as stored.
    /// [`StoreError::Conflict`] when the relationship version moved on or the
    /// row is gone.
    async fn spend_recovery_item(&self, spend: &RecoverySpend) -> Result<SpendResult, StoreError>;
}
