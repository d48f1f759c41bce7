//! Repository for the `streak_recovery_items` table.

use sqlx::PgExecutor;
use tether_core::reward::RecoveryKind;
use tether_core::store::RecoverySpend;
use tether_core::types::{DbId, Timestamp};

use crate::models::reward::RecoveryItemRow;

/// Column list for `streak_recovery_items` queries.
const COLUMNS: &str =
    "id, user_id, kind, quantity, premium_only, expires_at, created_at, updated_at";

/// Provides data access for consumable recovery items.
pub struct RecoveryItemRepo;

impl RecoveryItemRepo {
    pub async fn list_for_user(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
    ) -> Result<Vec<RecoveryItemRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM streak_recovery_items \
             WHERE user_id = $1 \
             ORDER BY kind"
        );
        sqlx::query_as::<_, RecoveryItemRow>(&query)
            .bind(user_id)
            .fetch_all(executor)
            .await
    }

    pub async fn find(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        item_id: DbId,
    ) -> Result<Option<RecoveryItemRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM streak_recovery_items WHERE id = $1 AND user_id = $2");
        sqlx::query_as::<_, RecoveryItemRow>(&query)
            .bind(item_id)
            .bind(user_id)
            .fetch_optional(executor)
            .await
    }

    /// Add stock of one kind, creating the row on first grant.
    ///
    /// On conflict only the quantity grows; `premium_only` and `expires_at`
    /// keep the values from the first grant.
    pub async fn add(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        kind: RecoveryKind,
        quantity: i32,
        premium_only: bool,
        expires_at: Option<Timestamp>,
    ) -> Result<RecoveryItemRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO streak_recovery_items (user_id, kind, quantity, premium_only, expires_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, kind) DO UPDATE \
                SET quantity = streak_recovery_items.quantity + EXCLUDED.quantity \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RecoveryItemRow>(&query)
            .bind(user_id)
            .bind(kind.as_str())
            .bind(quantity)
            .bind(premium_only)
            .bind(expires_at)
            .fetch_one(executor)
            .await
    }

    /// Record a spend under its `use_id`. Returns `false` if that use was
    /// already recorded.
    pub async fn record_use(
        executor: impl PgExecutor<'_>,
        spend: &RecoverySpend,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO streak_recovery_uses \
                (use_id, user_id, item_id, relationship_id, used_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (use_id) DO NOTHING",
        )
        .bind(spend.use_id)
        .bind(spend.user_id)
        .bind(spend.item_id)
        .bind(spend.extended.relationship_id)
        .bind(spend.used_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Decrement quantity by one if any is left. Returns `false` otherwise.
    pub async fn consume_one(
        executor: impl PgExecutor<'_>,
        user_id: DbId,
        item_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE streak_recovery_items SET quantity = quantity - 1 \
             WHERE id = $1 AND user_id = $2 AND quantity > 0",
        )
        .bind(item_id)
        .bind(user_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
