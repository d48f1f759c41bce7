//! [`RemoteStore`] backed by Postgres.

use async_trait::async_trait;
use sqlx::PgConnection;
use tether_core::levels;
use tether_core::milestone::{NewMilestone, StreakMilestone};
use tether_core::reward::{RewardEffect, RewardGrant, StreakRecoveryItem, UserReward};
use tether_core::store::{
    ClaimResult, CommittedEvent, EventCommit, MilestoneClaim, RecoverySpend, RemoteStore,
    SpendResult, StoreError,
};
use tether_core::streak::{RelationshipStreak, StreakEvent, UserStreak};
use tether_core::types::{DbId, Timestamp};

use crate::mapping::{map_rows, map_sqlx_error};
use crate::repositories::{
    MilestoneRepo, RecoveryItemRepo, RelationshipStreakRepo, RewardRepo, StreakEventRepo,
    UserStreakRepo,
};
use crate::DbPool;

/// Authoritative store for streak state.
///
/// Multi-statement writes (`commit_event`, `record_milestone`,
/// `claim_milestone`, `grant_reward`, `spend_recovery_item`) run in a single
/// transaction; everything else is one statement.
#[derive(Clone)]
pub struct PgRemoteStore {
    pool: DbPool,
}

impl PgRemoteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    // -- streaks -----------------------------------------------------------

    async fn load_user_streak(&self, user_id: DbId) -> Result<Option<UserStreak>, StoreError> {
        let row = UserStreakRepo::find_by_user(&self.pool, user_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(UserStreak::from))
    }

    async fn load_relationship_streak(
        &self,
        user_id: DbId,
        relationship_id: DbId,
    ) -> Result<Option<RelationshipStreak>, StoreError> {
        let row = RelationshipStreakRepo::find(&self.pool, user_id, relationship_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(RelationshipStreak::try_from).transpose()?)
    }

    async fn list_relationship_streaks(
        &self,
        user_id: DbId,
    ) -> Result<Vec<RelationshipStreak>, StoreError> {
        let rows = RelationshipStreakRepo::list_for_user(&self.pool, user_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(map_rows(rows)?)
    }

    async fn save_relationship_streak(
        &self,
        streak: &RelationshipStreak,
    ) -> Result<RelationshipStreak, StoreError> {
        let row = if streak.is_persisted() {
            RelationshipStreakRepo::update(&self.pool, streak).await
        } else {
            RelationshipStreakRepo::insert(&self.pool, streak).await
        }
        .map_err(map_sqlx_error)?
        .ok_or(StoreError::Conflict)?;
        Ok(RelationshipStreak::try_from(row)?)
    }

    async fn commit_event(&self, commit: &EventCommit) -> Result<CommittedEvent, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Dropping `tx` on any early return rolls the whole commit back.
        let appended = StreakEventRepo::append(&mut *tx, &commit.event)
            .await
            .map_err(map_sqlx_error)?;
        if appended.is_none() {
            return Err(StoreError::Duplicate);
        }

        let written = if commit.user.is_persisted() {
            UserStreakRepo::update_streak_fields(&mut *tx, &commit.user).await
        } else {
            UserStreakRepo::insert(&mut *tx, &commit.user).await
        }
        .map_err(map_sqlx_error)?;
        if written.is_none() {
            return Err(StoreError::Conflict);
        }

        let relationship = match &commit.relationship {
            Some(streak) => {
                let row = if streak.is_persisted() {
                    RelationshipStreakRepo::update(&mut *tx, streak).await
                } else {
                    RelationshipStreakRepo::insert(&mut *tx, streak).await
                }
                .map_err(map_sqlx_error)?
                .ok_or(StoreError::Conflict)?;
                Some(RelationshipStreak::try_from(row)?)
            }
            None => None,
        };

        let user = credit_points(&mut tx, commit.event.user_id, commit.event.points_earned).await?;

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(
            event_id = %commit.event.event_id,
            user_id = commit.event.user_id,
            points = commit.event.points_earned,
            "Streak event committed",
        );

        Ok(CommittedEvent { user, relationship })
    }

    async fn list_users_with_relationships(&self) -> Result<Vec<DbId>, StoreError> {
        RelationshipStreakRepo::list_user_ids(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn list_events(
        &self,
        user_id: DbId,
        relationship_id: Option<DbId>,
    ) -> Result<Vec<StreakEvent>, StoreError> {
        let rows = StreakEventRepo::list(&self.pool, user_id, relationship_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(map_rows(rows)?)
    }

    // -- milestones --------------------------------------------------------

    async fn list_milestones(
        &self,
        user_id: DbId,
        relationship_id: Option<DbId>,
    ) -> Result<Vec<StreakMilestone>, StoreError> {
        let rows = MilestoneRepo::list_for_entity(&self.pool, user_id, relationship_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(map_rows(rows)?)
    }

    async fn list_unclaimed_milestones(
        &self,
        user_id: DbId,
    ) -> Result<Vec<StreakMilestone>, StoreError> {
        let rows = MilestoneRepo::list_unclaimed(&self.pool, user_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(map_rows(rows)?)
    }

    async fn get_milestone(
        &self,
        user_id: DbId,
        milestone_id: DbId,
    ) -> Result<Option<StreakMilestone>, StoreError> {
        let row = MilestoneRepo::find(&self.pool, user_id, milestone_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(StreakMilestone::try_from).transpose()?)
    }

    async fn record_milestone(
        &self,
        milestone: &NewMilestone,
        badge: &RewardGrant,
    ) -> Result<StreakMilestone, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // A unique violation maps to `Duplicate` and rolls the badge back too.
        let row = MilestoneRepo::insert(&mut *tx, milestone)
            .await
            .map_err(map_sqlx_error)?;
        apply_grant(&mut tx, badge).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(StreakMilestone::try_from(row)?)
    }

    async fn claim_milestone(&self, claim: &MilestoneClaim) -> Result<ClaimResult, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let flipped = MilestoneRepo::claim(
            &mut *tx,
            claim.user_id,
            claim.milestone_id,
            claim.claim_id,
            claim.claimed_at,
        )
        .await
        .map_err(map_sqlx_error)?;
        let row = match flipped {
            Some(row) => row,
            None => {
                let current = MilestoneRepo::find(&mut *tx, claim.user_id, claim.milestone_id)
                    .await
                    .map_err(map_sqlx_error)?
                    .ok_or(StoreError::NotFound)?;
                if current.claim_id != Some(claim.claim_id) {
                    return Ok(ClaimResult::AlreadyClaimed);
                }
                current
            }
        };
        let reward = apply_grant(&mut tx, &claim.payout).await?;

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(
            user_id = claim.user_id,
            milestone_id = claim.milestone_id,
            claim_id = %claim.claim_id,
            "Milestone claim committed",
        );
        Ok(ClaimResult::Claimed {
            milestone: StreakMilestone::try_from(row)?,
            reward,
        })
    }

    // -- rewards -----------------------------------------------------------

    async fn grant_reward(&self, grant: &RewardGrant) -> Result<UserReward, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let reward = apply_grant(&mut tx, grant).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(reward)
    }

    async fn list_rewards(&self, user_id: DbId) -> Result<Vec<UserReward>, StoreError> {
        let rows = RewardRepo::list_for_user(&self.pool, user_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(map_rows(rows)?)
    }

    async fn mark_reward_redeemed(
        &self,
        user_id: DbId,
        reward_id: DbId,
        redeemed_at: Timestamp,
    ) -> Result<bool, StoreError> {
        RewardRepo::mark_redeemed(&self.pool, user_id, reward_id, redeemed_at)
            .await
            .map_err(map_sqlx_error)
    }

    // -- recovery items ----------------------------------------------------

    async fn list_recovery_items(
        &self,
        user_id: DbId,
    ) -> Result<Vec<StreakRecoveryItem>, StoreError> {
        let rows = RecoveryItemRepo::list_for_user(&self.pool, user_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(map_rows(rows)?)
    }

    async fn get_recovery_item(
        &self,
        user_id: DbId,
        item_id: DbId,
    ) -> Result<Option<StreakRecoveryItem>, StoreError> {
        let row = RecoveryItemRepo::find(&self.pool, user_id, item_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(StreakRecoveryItem::try_from).transpose()?)
    }

    async fn spend_recovery_item(&self, spend: &RecoverySpend) -> Result<SpendResult, StoreError> {
        let (user_id, relationship_id) = (spend.extended.user_id, spend.extended.relationship_id);
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let recorded = RecoveryItemRepo::record_use(&mut *tx, spend)
            .await
            .map_err(map_sqlx_error)?;
        if !recorded {
            // This use already landed; report the streak as it stands.
            let row = RelationshipStreakRepo::find(&mut *tx, user_id, relationship_id)
                .await
                .map_err(map_sqlx_error)?
                .ok_or(StoreError::NotFound)?;
            return Ok(SpendResult::Spent(RelationshipStreak::try_from(row)?));
        }

        let consumed = RecoveryItemRepo::consume_one(&mut *tx, spend.user_id, spend.item_id)
            .await
            .map_err(map_sqlx_error)?;
        if !consumed {
            return Ok(SpendResult::OutOfStock);
        }

        let row = RelationshipStreakRepo::update(&mut *tx, &spend.extended)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(StoreError::Conflict)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(
            user_id,
            relationship_id,
            item_id = spend.item_id,
            use_id = %spend.use_id,
            "Recovery item spent",
        );
        Ok(SpendResult::Spent(RelationshipStreak::try_from(row)?))
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

/// Add `delta` to a user's points and store the recomputed level fields.
/// The user row must exist.
async fn credit_points(
    conn: &mut PgConnection,
    user_id: DbId,
    delta: i64,
) -> Result<UserStreak, StoreError> {
    let total = UserStreakRepo::add_points(&mut *conn, user_id, delta)
        .await
        .map_err(map_sqlx_error)?;
    let progress = levels::level_for_points(total);
    let row = UserStreakRepo::set_level(
        &mut *conn,
        user_id,
        progress.level,
        progress.points_to_next_level,
    )
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.into())
}

/// Insert a reward under its grant key and apply its effect. When the key
/// is already taken the stored reward is returned and nothing is applied.
async fn apply_grant(conn: &mut PgConnection, grant: &RewardGrant) -> Result<UserReward, StoreError> {
    let user_id = grant.user_id();
    let inserted = RewardRepo::insert(&mut *conn, &grant.grant_key, &grant.reward)
        .await
        .map_err(map_sqlx_error)?;
    let Some(row) = inserted else {
        let existing = RewardRepo::find_by_grant_key(&mut *conn, user_id, &grant.grant_key)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(StoreError::NotFound)?;
        return Ok(UserReward::try_from(existing)?);
    };

    match &grant.effect {
        RewardEffect::Record => {}
        RewardEffect::Points(delta) => {
            UserStreakRepo::ensure_exists(&mut *conn, user_id)
                .await
                .map_err(map_sqlx_error)?;
            credit_points(conn, user_id, *delta).await?;
        }
        RewardEffect::RecoveryItems {
            kind,
            quantity,
            premium_only,
            expires_at,
        } => {
            RecoveryItemRepo::add(&mut *conn, user_id, *kind, *quantity, *premium_only, *expires_at)
                .await
                .map_err(map_sqlx_error)?;
        }
    }
    Ok(UserReward::try_from(row)?)
}
