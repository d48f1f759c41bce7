//! Repository for the append-only `streak_events` table.

use sqlx::PgExecutor;
use tether_core::streak::StreakEvent;
use tether_core::types::DbId;

use crate::models::streak::StreakEventRow;

/// Column list for `streak_events` queries.
const COLUMNS: &str =
    "id, event_id, user_id, relationship_id, kind, occurred_at, points_earned, created_at";

/// Provides append and read access to streak events. Events are never
/// updated or deleted.
pub struct StreakEventRepo;

impl StreakEventRepo {
    /// Append an event.
    ///
    /// Returns `None` if an event with the same `event_id` was already
    /// appended.
    pub async fn append(
        executor: impl PgExecutor<'_>,
        event: &StreakEvent,
    ) -> Result<Option<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO streak_events \
                (event_id, user_id, relationship_id, kind, occurred_at, points_earned) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (event_id) DO NOTHING \
             RETURNING id",
        )
        .bind(event.event_id)
        .bind(event.user_id)
        .bind(event.relationship_id)
        .bind(event.kind.as_str())
        .bind(event.occurred_at)
        .bind(event.points_earned)
        .fetch_optional(executor)
        .await
    }

    /// List a user's events in occurrence order, optionally narrowed to one
    /// relationship.
    pub async fn list(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        relationship_id: Option<DbId>,
    ) -> Result<Vec<StreakEventRow>, sqlx::Error> {
        let filter = if relationship_id.is_some() {
            "AND relationship_id = $2"
        } else {
            ""
        };
        let query = format!(
            "SELECT {COLUMNS} FROM streak_events \
             WHERE user_id = $1 {filter} \
             ORDER BY occurred_at, id"
        );
        let mut q = sqlx::query_as::<_, StreakEventRow>(&query).bind(user_id);
        if let Some(id) = relationship_id {
            q = q.bind(id);
        }
        q.fetch_all(executor).await
    }
}
