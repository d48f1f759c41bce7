//! Reward Ledger: issues rewards, pays milestone claims, and spends
//! recovery items.
//!
//! Each operation ends in a single keyed store write, so a retry after a
//! lost response (or an offline replay of the same event) finds the earlier
//! write instead of repeating it.

use std::sync::Arc;

use tether_core::calculator::extend_grace;
use tether_core::error::StreakError;
use tether_core::milestone::StreakMilestone;
use tether_core::reward::{RecoveryKind, RewardGrant, UserReward};
use tether_core::store::{ClaimResult, MilestoneClaim, RecoverySpend, SpendResult, StoreError};
use tether_core::streak::{RelationshipStreak, StreakStatus};
use tether_core::types::{DbId, EventId, Timestamp};

use crate::remote::RemoteClient;

/// Maximum reload-and-retry rounds when a conditional update loses a race.
pub(crate) const CONFLICT_ATTEMPTS: u32 = 3;

/// Result of a successful milestone claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub milestone: StreakMilestone,
    pub reward: UserReward,
}

/// A recovery item spent against a relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryUse {
    pub kind: RecoveryKind,
    pub extension_days: i64,
    pub relationship: RelationshipStreak,
}

pub struct RewardLedger {
    remote: Arc<RemoteClient>,
}

impl RewardLedger {
    pub fn new(remote: Arc<RemoteClient>) -> Self {
        Self { remote }
    }

    /// Record a reward and apply its effect, once per grant key.
    ///
    /// Points are added to the user's total (levels recomputed by the store).
    /// `streak_freeze` / `streak_saver` features add a recovery item, savers
    /// with an expiry. Badges are recorded only.
    pub async fn issue_reward(&self, grant: &RewardGrant) -> Result<UserReward, StreakError> {
        let store = self.remote.store();
        let reward = self.remote.run(|| store.grant_reward(grant)).await?;

        tracing::info!(
            user_id = reward.user_id,
            reward_id = reward.id,
            grant_key = %grant.grant_key,
            kind = reward.kind.as_str(),
            value = %reward.value,
            amount = reward.amount,
            "Reward issued",
        );
        Ok(reward)
    }

    /// Mark a milestone claimed and pay its configured reward in one write.
    ///
    /// The claim is keyed by `claim_id`: repeating it returns the original
    /// payout, while a different claim on a claimed milestone fails with
    /// [`StreakError::AlreadyClaimed`].
    pub async fn claim_milestone(
        &self,
        user_id: DbId,
        milestone_id: DbId,
        claim_id: EventId,
        now: Timestamp,
    ) -> Result<Claim, StreakError> {
        let store = self.remote.store();
        let milestone = self
            .remote
            .run(|| store.get_milestone(user_id, milestone_id))
            .await?
            .ok_or(StreakError::NotFound {
                entity: "milestone",
                id: milestone_id,
            })?;

        let claim = MilestoneClaim {
            user_id,
            milestone_id,
            claim_id,
            claimed_at: now,
            payout: milestone.payout(now),
        };
        match self.remote.run(|| store.claim_milestone(&claim)).await? {
            ClaimResult::Claimed { milestone, reward } => {
                tracing::info!(
                    user_id,
                    milestone_id,
                    reward_id = reward.id,
                    kind = reward.kind.as_str(),
                    amount = reward.amount,
                    "Milestone claimed",
                );
                Ok(Claim { milestone, reward })
            }
            ClaimResult::AlreadyClaimed => Err(StreakError::AlreadyClaimed(milestone_id)),
        }
    }

    /// Spend one recovery item and extend the target relationship's grace
    /// period in one write keyed by `use_id`.
    ///
    /// Fails with [`StreakError::NoItemAvailable`] (nothing spent) when the
    /// item is missing, empty or expired, and [`StreakError::InvalidState`]
    /// when the relationship is already broken.
    pub async fn use_recovery_item(
        &self,
        user_id: DbId,
        item_id: DbId,
        relationship_id: DbId,
        use_id: EventId,
        extension_days: impl Fn(RecoveryKind) -> i64,
        now: Timestamp,
    ) -> Result<RecoveryUse, StreakError> {
        let store = self.remote.store();
        let item = self
            .remote
            .run(|| store.get_recovery_item(user_id, item_id))
            .await?
            .ok_or(StreakError::NoItemAvailable)?;
        // Stock is checked by the spend itself: a repeated use may find the
        // item already emptied by its own first attempt.
        if item.is_expired(now) {
            return Err(StreakError::NoItemAvailable);
        }
        let days = extension_days(item.kind);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let relationship = self
                .remote
                .run(|| store.load_relationship_streak(user_id, relationship_id))
                .await?
                .ok_or(StreakError::NotFound {
                    entity: "relationship_streak",
                    id: relationship_id,
                })?;
            check_extendable(&relationship)?;

            let spend = RecoverySpend {
                user_id,
                item_id,
                use_id,
                used_at: now,
                extended: extend_grace(&relationship, days),
            };
            match self.remote.run(|| store.spend_recovery_item(&spend)).await {
                Ok(SpendResult::Spent(relationship)) => {
                    tracing::info!(
                        user_id,
                        relationship_id,
                        item_id,
                        kind = item.kind.as_str(),
                        days,
                        "Recovery item used",
                    );
                    return Ok(RecoveryUse {
                        kind: item.kind,
                        extension_days: days,
                        relationship,
                    });
                }
                Ok(SpendResult::OutOfStock) => return Err(StreakError::NoItemAvailable),
                Err(StoreError::Conflict) if attempt < CONFLICT_ATTEMPTS => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn redeem_reward(
        &self,
        user_id: DbId,
        reward_id: DbId,
        now: Timestamp,
    ) -> Result<bool, StreakError> {
        let store = self.remote.store();
        Ok(self
            .remote
            .run(|| store.mark_reward_redeemed(user_id, reward_id, now))
            .await?)
    }
}

fn check_extendable(relationship: &RelationshipStreak) -> Result<(), StreakError> {
    if relationship.status == StreakStatus::Broken {
        return Err(StreakError::InvalidState(format!(
            "relationship {} streak is already broken",
            relationship.relationship_id
        )));
    }
    if relationship.grace_period_ends.is_none() {
        return Err(StreakError::InvalidState(format!(
            "relationship {} has no contact to extend",
            relationship.relationship_id
        )));
    }
    Ok(())
}
