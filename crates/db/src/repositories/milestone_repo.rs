//! Repository for the `streak_milestones` table.

use sqlx::PgExecutor;
use tether_core::milestone::NewMilestone;
use tether_core::types::{DbId, EventId, Timestamp};

use crate::models::milestone::StreakMilestoneRow;

/// Column list for `streak_milestones` queries.
const COLUMNS: &str = "id, user_id, relationship_id, milestone_type, threshold_days, \
    reward_kind, reward_value, reward_amount, claimed, achieved_at, claimed_at, claim_id, \
    created_at";

/// Provides data access for streak milestones.
pub struct MilestoneRepo;

impl MilestoneRepo {
    /// Milestones recorded for one streak: the user streak when
    /// `relationship_id` is `None`, otherwise that relationship's streak.
    pub async fn list_for_entity(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        relationship_id: Option<DbId>,
    ) -> Result<Vec<StreakMilestoneRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM streak_milestones \
             WHERE user_id = $1 AND relationship_id IS NOT DISTINCT FROM $2 \
             ORDER BY threshold_days"
        );
        sqlx::query_as::<_, StreakMilestoneRow>(&query)
            .bind(user_id)
            .bind(relationship_id)
            .fetch_all(executor)
            .await
    }

    /// Every unclaimed milestone of a user, oldest first.
    pub async fn list_unclaimed(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
    ) -> Result<Vec<StreakMilestoneRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM streak_milestones \
             WHERE user_id = $1 AND claimed = false \
             ORDER BY achieved_at, id"
        );
        sqlx::query_as::<_, StreakMilestoneRow>(&query)
            .bind(user_id)
            .fetch_all(executor)
            .await
    }

    pub async fn find(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        milestone_id: DbId,
    ) -> Result<Option<StreakMilestoneRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM streak_milestones WHERE id = $1 AND user_id = $2");
        sqlx::query_as::<_, StreakMilestoneRow>(&query)
            .bind(milestone_id)
            .bind(user_id)
            .fetch_optional(executor)
            .await
    }

    /// Insert a milestone. A second insert for the same entity and type
    /// fails with a unique violation on `uq_streak_milestones_entity`.
    pub async fn insert(
        executor: impl PgExecutor<'_>,
        milestone: &NewMilestone,
    ) -> Result<StreakMilestoneRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO streak_milestones \
                (user_id, relationship_id, milestone_type, threshold_days, reward_kind, \
                 reward_value, reward_amount, achieved_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StreakMilestoneRow>(&query)
            .bind(milestone.user_id)
            .bind(milestone.relationship_id)
            .bind(&milestone.milestone_type)
            .bind(milestone.threshold_days)
            .bind(milestone.reward_kind.as_str())
            .bind(&milestone.reward_value)
            .bind(milestone.reward_amount)
            .bind(milestone.achieved_at)
            .fetch_one(executor)
            .await
    }

    /// Flip `claimed` from false to true on behalf of `claim_id`.
    ///
    /// Returns `None` if the milestone is missing or was already claimed.
    pub async fn claim(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        milestone_id: DbId,
        claim_id: EventId,
        claimed_at: Timestamp,
    ) -> Result<Option<StreakMilestoneRow>, sqlx::Error> {
        let query = format!(
            "UPDATE streak_milestones SET claimed = true, claimed_at = $3, claim_id = $4 \
             WHERE id = $1 AND user_id = $2 AND claimed = false \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StreakMilestoneRow>(&query)
            .bind(milestone_id)
            .bind(user_id)
            .bind(claimed_at)
            .bind(claim_id)
            .fetch_optional(executor)
            .await
    }
}
