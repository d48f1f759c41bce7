//! Repository for the `relationship_streaks` table.

use sqlx::PgExecutor;
use tether_core::streak::RelationshipStreak;
use tether_core::types::DbId;

use crate::models::streak::RelationshipStreakRow;

/// Column list for `relationship_streaks` queries.
const COLUMNS: &str = "id, user_id, relationship_id, current_streak, longest_streak, \
    last_contact_date, next_contact_due_date, grace_period_ends, status, \
    contact_frequency_days, version, created_at, updated_at";

/// Provides data access for per-relationship streaks.
pub struct RelationshipStreakRepo;

impl RelationshipStreakRepo {
    pub async fn find(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        relationship_id: DbId,
    ) -> Result<Option<RelationshipStreakRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM relationship_streaks \
             WHERE user_id = $1 AND relationship_id = $2"
        );
        sqlx::query_as::<_, RelationshipStreakRow>(&query)
            .bind(user_id)
            .bind(relationship_id)
            .fetch_optional(executor)
            .await
    }

    /// List every relationship streak for a user.
    pub async fn list_for_user(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
    ) -> Result<Vec<RelationshipStreakRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM relationship_streaks \
             WHERE user_id = $1 \
             ORDER BY relationship_id"
        );
        sqlx::query_as::<_, RelationshipStreakRow>(&query)
            .bind(user_id)
            .fetch_all(executor)
            .await
    }

    /// Distinct users that track at least one relationship.
    pub async fn list_user_ids(executor: impl PgExecutor<'_>) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar("SELECT DISTINCT user_id FROM relationship_streaks ORDER BY user_id")
            .fetch_all(executor)
            .await
    }

    /// Insert a new relationship streak.
    ///
    /// Returns `None` if the `(user_id, relationship_id)` pair already exists.
    pub async fn insert(
        executor: impl PgExecutor<'_>,
        streak: &RelationshipStreak,
    ) -> Result<Option<RelationshipStreakRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO relationship_streaks \
                (user_id, relationship_id, current_streak, longest_streak, last_contact_date, \
                 next_contact_due_date, grace_period_ends, status, contact_frequency_days) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (user_id, relationship_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RelationshipStreakRow>(&query)
            .bind(streak.user_id)
            .bind(streak.relationship_id)
            .bind(streak.current_streak)
            .bind(streak.longest_streak)
            .bind(streak.last_contact_date)
            .bind(streak.next_contact_due_date)
            .bind(streak.grace_period_ends)
            .bind(streak.status.as_str())
            .bind(streak.contact_frequency_days)
            .fetch_optional(executor)
            .await
    }

    /// Update a relationship streak if the stored version still matches
    /// `streak.version`, bumping the version.
    ///
    /// Returns `None` when the version check fails.
    pub async fn update(
        executor: impl PgExecutor<'_>,
        streak: &RelationshipStreak,
    ) -> Result<Option<RelationshipStreakRow>, sqlx::Error> {
        let query = format!(
            "UPDATE relationship_streaks SET \
                current_streak = $3, \
                longest_streak = $4, \
                last_contact_date = $5, \
                next_contact_due_date = $6, \
                grace_period_ends = $7, \
                status = $8, \
                contact_frequency_days = $9, \
                version = version + 1 \
             WHERE user_id = $1 AND relationship_id = $2 AND version = $10 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RelationshipStreakRow>(&query)
            .bind(streak.user_id)
            .bind(streak.relationship_id)
            .bind(streak.current_streak)
            .bind(streak.longest_streak)
            .bind(streak.last_contact_date)
            .bind(streak.next_contact_due_date)
            .bind(streak.grace_period_ends)
            .bind(streak.status.as_str())
            .bind(streak.contact_frequency_days)
            .bind(streak.version)
            .fetch_optional(executor)
            .await
    }
}
