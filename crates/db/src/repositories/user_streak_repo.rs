//! Repository for the `user_streaks` table.

use sqlx::PgExecutor;
use tether_core::streak::UserStreak;
use tether_core::types::DbId;

use crate::models::streak::UserStreakRow;

/// Column list for `user_streaks` queries.
const COLUMNS: &str = "id, user_id, current_streak_days, longest_streak_days, multiplier, \
    total_points, level, points_to_next_level, last_activity_date, version, archived_at, \
    created_at, updated_at";

/// Provides data access for per-user streaks.
pub struct UserStreakRepo;

impl UserStreakRepo {
    /// Find the streak row for a user.
    pub async fn find_by_user(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
    ) -> Result<Option<UserStreakRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM user_streaks WHERE user_id = $1");
        sqlx::query_as::<_, UserStreakRow>(&query)
            .bind(user_id)
            .fetch_optional(executor)
            .await
    }

    /// Insert the streak fields of a new user streak.
    ///
    /// Returns `None` if a row for the user already exists (another writer
    /// created it first).
    pub async fn insert(
        executor: impl PgExecutor<'_>,
        streak: &UserStreak,
    ) -> Result<Option<UserStreakRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_streaks \
                (user_id, current_streak_days, longest_streak_days, multiplier, last_activity_date) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserStreakRow>(&query)
            .bind(streak.user_id)
            .bind(streak.current_streak_days)
            .bind(streak.longest_streak_days)
            .bind(streak.multiplier)
            .bind(streak.last_activity_date)
            .fetch_optional(executor)
            .await
    }

    /// Update the streak fields if the stored version still matches
    /// `streak.version`, bumping the version.
    ///
    /// Returns `None` when the version check fails. Point and level columns
    /// are never written here.
    pub async fn update_streak_fields(
        executor: impl PgExecutor<'_>,
        streak: &UserStreak,
    ) -> Result<Option<UserStreakRow>, sqlx::Error> {
        let query = format!(
            "UPDATE user_streaks SET \
                current_streak_days = $2, \
                longest_streak_days = $3, \
                multiplier = $4, \
                last_activity_date = $5, \
                version = version + 1 \
             WHERE user_id = $1 AND version = $6 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserStreakRow>(&query)
            .bind(streak.user_id)
            .bind(streak.current_streak_days)
            .bind(streak.longest_streak_days)
            .bind(streak.multiplier)
            .bind(streak.last_activity_date)
            .bind(streak.version)
            .fetch_optional(executor)
            .await
    }

    /// Create an empty streak row for a user if none exists.
    pub async fn ensure_exists(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO user_streaks (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Atomically add `delta` to the point total, returning the new total.
    ///
    /// The row stays locked until the surrounding transaction ends, so a
    /// following [`set_level`](Self::set_level) sees no interleaved writer.
    pub async fn add_points(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        delta: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE user_streaks SET total_points = total_points + $2 \
             WHERE user_id = $1 \
             RETURNING total_points",
        )
        .bind(user_id)
        .bind(delta)
        .fetch_one(executor)
        .await
    }

    /// Store recomputed level fields.
    pub async fn set_level(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        level: i32,
        points_to_next_level: i64,
    ) -> Result<UserStreakRow, sqlx::Error> {
        let query = format!(
            "UPDATE user_streaks SET level = $2, points_to_next_level = $3 \
             WHERE user_id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserStreakRow>(&query)
            .bind(user_id)
            .bind(level)
            .bind(points_to_next_level)
            .fetch_one(executor)
            .await
    }
}
