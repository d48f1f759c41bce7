//! Repository for the `user_rewards` table.

use sqlx::PgExecutor;
use tether_core::reward::NewReward;
use tether_core::types::{DbId, Timestamp};

use crate::models::reward::UserRewardRow;

/// Column list for `user_rewards` queries.
const COLUMNS: &str =
    "id, user_id, kind, value, amount, awarded_at, redeemed, redeemed_at, grant_key";

/// Provides data access for the reward ledger.
pub struct RewardRepo;

impl RewardRepo {
    /// Insert a reward under `grant_key`.
    ///
    /// Returns `None` if the user already has a reward with that key.
    pub async fn insert(
        executor: impl PgExecutor<'_>,
        grant_key: &str,
        reward: &NewReward,
    ) -> Result<Option<UserRewardRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_rewards (user_id, kind, value, amount, awarded_at, grant_key) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id, grant_key) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserRewardRow>(&query)
            .bind(reward.user_id)
            .bind(reward.kind.as_str())
            .bind(&reward.value)
            .bind(reward.amount)
            .bind(reward.awarded_at)
            .bind(grant_key)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_grant_key(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        grant_key: &str,
    ) -> Result<Option<UserRewardRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM user_rewards WHERE user_id = $1 AND grant_key = $2");
        sqlx::query_as::<_, UserRewardRow>(&query)
            .bind(user_id)
            .bind(grant_key)
            .fetch_optional(executor)
            .await
    }

    /// List a user's rewards, most recent first.
    pub async fn list_for_user(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
    ) -> Result<Vec<UserRewardRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_rewards \
             WHERE user_id = $1 \
             ORDER BY awarded_at DESC, id DESC"
        );
        sqlx::query_as::<_, UserRewardRow>(&query)
            .bind(user_id)
            .fetch_all(executor)
            .await
    }

    /// Flip `redeemed` from false to true. Returns `false` if the reward is
    /// missing or was already redeemed.
    pub async fn mark_redeemed(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        reward_id: DbId,
        redeemed_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_rewards SET redeemed = true, redeemed_at = $3 \
             WHERE id = $1 AND user_id = $2 AND redeemed = false",
        )
        .bind(reward_id)
        .bind(user_id)
        .bind(redeemed_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
